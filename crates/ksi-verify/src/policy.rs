//! Composite policy tree and its evaluation algorithm (spec.md §4.7).

use crate::context::VerificationContext;
use crate::rules::{Rule, RuleOutcome, VerError};
use ksi_proto::signature::Signature;
use tracing::{debug, trace};

/// The policy's terminal verdict: success, a specific rule failure, or —
/// with no fallback available to resolve it — genuinely indeterminate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyOutcome {
    Ok,
    Fail(VerError, String),
    Inconclusive,
}

impl PolicyOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, PolicyOutcome::Ok)
    }
}

/// "A tree of per-rule results plus the terminal (error_code, message)"
/// (spec.md §4.7). `fallback` is populated only when this policy's own
/// rules were inconclusive and a fallback policy ran in its place.
#[derive(Debug)]
pub struct PolicyResult {
    pub policy: &'static str,
    pub rule_results: Vec<(&'static str, RuleOutcome)>,
    pub outcome: PolicyOutcome,
    pub fallback: Option<Box<PolicyResult>>,
}

/// An ordered sequence of rules with an optional fallback policy, per
/// spec.md §4.7.
pub struct Policy {
    pub name: &'static str,
    pub rules: Vec<Box<dyn Rule>>,
    pub fallback: Option<Box<Policy>>,
}

impl Policy {
    pub fn new(name: &'static str, rules: Vec<Box<dyn Rule>>) -> Self {
        Self {
            name,
            rules,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Policy) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Implements spec.md §4.7's four-step algorithm: run rules in order,
    /// stopping at the first non-ok; a fail short-circuits without running
    /// the fallback; an inconclusive final rule defers to the fallback, if
    /// any.
    pub fn evaluate(&self, signature: &Signature, ctx: &VerificationContext) -> PolicyResult {
        let mut rule_results = Vec::with_capacity(self.rules.len());
        let mut last = RuleOutcome::Inconclusive;

        for rule in &self.rules {
            let outcome = rule.evaluate(signature, ctx);
            trace!(policy = self.name, rule = rule.name(), outcome = ?outcome, "rule evaluated");
            rule_results.push((rule.name(), outcome.clone()));
            let stop = !matches!(outcome, RuleOutcome::Ok);
            last = outcome;
            if stop {
                break;
            }
        }

        match last {
            RuleOutcome::Ok => {
                debug!(policy = self.name, "policy succeeded");
                PolicyResult {
                    policy: self.name,
                    rule_results,
                    outcome: PolicyOutcome::Ok,
                    fallback: None,
                }
            }
            RuleOutcome::Fail(err) => {
                debug!(policy = self.name, error = %err, "policy failed");
                PolicyResult {
                    policy: self.name,
                    rule_results,
                    outcome: PolicyOutcome::Fail(err, err.to_string()),
                    fallback: None,
                }
            }
            RuleOutcome::Inconclusive => match &self.fallback {
                Some(fallback) => {
                    debug!(policy = self.name, fallback = fallback.name, "policy inconclusive, trying fallback");
                    let fallback_result = fallback.evaluate(signature, ctx);
                    PolicyResult {
                        policy: self.name,
                        rule_results,
                        outcome: fallback_result.outcome.clone(),
                        fallback: Some(Box::new(fallback_result)),
                    }
                }
                None => PolicyResult {
                    policy: self.name,
                    rule_results,
                    outcome: PolicyOutcome::Inconclusive,
                    fallback: None,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::VerificationContext;
    use ksi_proto::pki::StaticTrustStore;
    use std::sync::Arc;

    struct AlwaysOk;
    impl Rule for AlwaysOk {
        fn name(&self) -> &'static str {
            "always-ok"
        }
        fn evaluate(&self, _s: &Signature, _c: &VerificationContext) -> RuleOutcome {
            RuleOutcome::Ok
        }
    }

    struct AlwaysFail;
    impl Rule for AlwaysFail {
        fn name(&self) -> &'static str {
            "always-fail"
        }
        fn evaluate(&self, _s: &Signature, _c: &VerificationContext) -> RuleOutcome {
            RuleOutcome::Fail(VerError::CalChainRootMismatch)
        }
    }

    struct AlwaysInconclusive;
    impl Rule for AlwaysInconclusive {
        fn name(&self) -> &'static str {
            "always-inconclusive"
        }
        fn evaluate(&self, _s: &Signature, _c: &VerificationContext) -> RuleOutcome {
            RuleOutcome::Inconclusive
        }
    }

    fn dummy_signature() -> Signature {
        use ksi_core::{HashAlgorithm, Imprint};
        use ksi_proto::signature::{Attestation, PublicationRecord};
        Signature {
            aggregation_chains: vec![],
            calendar_chain: None,
            attestation: Attestation::Publication(PublicationRecord {
                publication_time: 0,
                publication_hash: Imprint::of(HashAlgorithm::Sha256, b"x"),
                publication_refs: vec![],
                repository_uris: vec![],
            }),
        }
    }

    fn ctx() -> VerificationContext {
        VerificationContext::new(Arc::new(StaticTrustStore::with_fingerprint([0u8; 32])))
    }

    #[test]
    fn a_failing_rule_stops_the_sequence_and_skips_fallback() {
        let policy = Policy::new("P", vec![Box::new(AlwaysFail), Box::new(AlwaysOk)])
            .with_fallback(Policy::new("FB", vec![Box::new(AlwaysOk)]));
        let result = policy.evaluate(&dummy_signature(), &ctx());
        assert_eq!(result.rule_results.len(), 1);
        assert!(matches!(result.outcome, PolicyOutcome::Fail(VerError::CalChainRootMismatch, _)));
        assert!(result.fallback.is_none());
    }

    #[test]
    fn an_inconclusive_result_defers_to_the_fallback() {
        let policy = Policy::new("P", vec![Box::new(AlwaysInconclusive)])
            .with_fallback(Policy::new("FB", vec![Box::new(AlwaysOk)]));
        let result = policy.evaluate(&dummy_signature(), &ctx());
        assert!(result.outcome.is_ok());
        let fallback = result.fallback.expect("fallback should have run");
        assert_eq!(fallback.policy, "FB");
    }

    #[test]
    fn an_inconclusive_result_with_no_fallback_stays_inconclusive() {
        let policy = Policy::new("P", vec![Box::new(AlwaysInconclusive)]);
        let result = policy.evaluate(&dummy_signature(), &ctx());
        assert_eq!(result.outcome, PolicyOutcome::Inconclusive);
    }

    #[test]
    fn an_all_ok_sequence_succeeds() {
        let policy = Policy::new("P", vec![Box::new(AlwaysOk), Box::new(AlwaysOk)]);
        let result = policy.evaluate(&dummy_signature(), &ctx());
        assert_eq!(result.rule_results.len(), 2);
        assert!(result.outcome.is_ok());
    }
}
