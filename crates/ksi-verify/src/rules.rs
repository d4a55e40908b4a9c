//! The rule catalogue (spec.md §4.7): one `Rule` per named check, each a
//! deterministic, side-effect-free function from `(signature, context)` to
//! an outcome. No rule performs I/O — anything a rule needs that requires a
//! network round trip (an extender fetch, say) is expected to already be
//! sitting on the [`crate::context::VerificationContext`] by the time
//! `evaluate` runs.

use crate::context::VerificationContext;
use ksi_proto::pki;
use ksi_proto::signature::{Attestation, Signature};
use thiserror::Error;

/// The closed `VER_ERR_*` enumeration from spec.md §4.7/§6/§8. Every rule
/// failure carries exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum VerError {
    #[error("aggregation chain times are not consistent across the signature")]
    AggrChainTimeInconsistent,
    #[error("the first aggregation chain's input hash does not match the document hash")]
    AggrChainInputHashMismatch,
    #[error("an aggregation chain failed to apply or chains are discontinuous")]
    AggrChainInternalInconsistent,
    #[error("the calendar chain's input hash does not match the aggregation root")]
    CalChainInputMismatch,
    #[error("the calendar chain's registration time does not match the aggregation time")]
    CalChainTimeMismatch,
    #[error("the calendar chain's root does not match the attestation's imprint")]
    CalChainRootMismatch,
    #[error("the calendar authentication record's PKI signature did not verify")]
    PkiSignatureInvalid,
    #[error("no matching publication record was found in the publications file")]
    PublicationNotFound,
    #[error("the user-supplied publication does not match the calendar root at its time")]
    UserPublicationMismatch,
    #[error("the extender-returned calendar chain does not match the stored aggregation root")]
    ExtenderCalChainMismatch,
}

/// Result of evaluating a single rule (spec.md §4.7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleOutcome {
    Ok,
    Fail(VerError),
    /// The rule had nothing to check given this context (e.g. no
    /// publications file was supplied) — not a failure, but not a pass
    /// either; the policy falls through to its fallback, if any.
    Inconclusive,
}

/// A single named, pure check against a signature.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, signature: &Signature, ctx: &VerificationContext) -> RuleOutcome;
}

/// Aggregation-chain time consistency: every chain's recorded aggregation
/// time must agree with each other, and — when the signature already
/// carries a calendar chain — with the time that chain registered against
/// (spec.md §4.3: "aggregation times across chains are consistent"
/// extends to the calendar anchor, not just sibling chains, which is what
/// lets a single-chain signature's altered time be caught here rather than
/// surfacing later as a calendar-chain mismatch).
pub struct AggrChainTimeRule;

impl Rule for AggrChainTimeRule {
    fn name(&self) -> &'static str {
        "aggr-chain-time-consistency"
    }

    fn evaluate(&self, signature: &Signature, _ctx: &VerificationContext) -> RuleOutcome {
        let mut times = signature.aggregation_chains.iter().map(|c| c.aggr_time);
        let Some(first) = times.next() else {
            return RuleOutcome::Fail(VerError::AggrChainInternalInconsistent);
        };
        if !times.all(|t| t == first) {
            return RuleOutcome::Fail(VerError::AggrChainTimeInconsistent);
        }
        if let Some(calendar) = &signature.calendar_chain {
            if calendar.aggregation_time != first {
                return RuleOutcome::Fail(VerError::AggrChainTimeInconsistent);
            }
        }
        RuleOutcome::Ok
    }
}

/// Aggregation-chain internal consistency: every chain applies and each
/// chain's output feeds the next chain's declared input (spec.md §4.3's
/// `aggregate` algorithm).
pub struct AggrChainConsistencyRule;

impl Rule for AggrChainConsistencyRule {
    fn name(&self) -> &'static str {
        "aggr-chain-internal-consistency"
    }

    fn evaluate(&self, signature: &Signature, _ctx: &VerificationContext) -> RuleOutcome {
        match signature.aggregate() {
            Ok(_) => RuleOutcome::Ok,
            Err(_) => RuleOutcome::Fail(VerError::AggrChainInternalInconsistent),
        }
    }
}

/// The first aggregation chain's input hash (and input level) must equal
/// the document hash the caller is verifying against, at the caller's
/// local aggregation level (spec.md §4.3 "Document-hash level"). With no
/// document hash supplied, there's nothing to check — inconclusive rather
/// than a pass, so a policy that cares can fall back.
pub struct AggrChainDocHashRule;

impl Rule for AggrChainDocHashRule {
    fn name(&self) -> &'static str {
        "aggr-chain-doc-hash"
    }

    fn evaluate(&self, signature: &Signature, ctx: &VerificationContext) -> RuleOutcome {
        let Some(doc_hash) = &ctx.document_hash else {
            return RuleOutcome::Inconclusive;
        };
        let Some(first) = signature.aggregation_chains.first() else {
            return RuleOutcome::Fail(VerError::AggrChainInternalInconsistent);
        };
        if first.input_level != ctx.local_level {
            return RuleOutcome::Fail(VerError::AggrChainInputHashMismatch);
        }
        if &first.input_hash == doc_hash {
            RuleOutcome::Ok
        } else {
            RuleOutcome::Fail(VerError::AggrChainInputHashMismatch)
        }
    }
}

/// The calendar chain's input hash must equal the aggregation root. A
/// signature with no calendar chain yet (not extended) has nothing to
/// check here.
pub struct CalChainInputRule;

impl Rule for CalChainInputRule {
    fn name(&self) -> &'static str {
        "cal-chain-input"
    }

    fn evaluate(&self, signature: &Signature, _ctx: &VerificationContext) -> RuleOutcome {
        let Some(calendar) = &signature.calendar_chain else {
            return RuleOutcome::Inconclusive;
        };
        match signature.aggregate() {
            Ok(root) if root == calendar.input_hash => RuleOutcome::Ok,
            Ok(_) => RuleOutcome::Fail(VerError::CalChainInputMismatch),
            Err(_) => RuleOutcome::Fail(VerError::AggrChainInternalInconsistent),
        }
    }
}

/// The calendar chain's registration time must equal the topmost
/// aggregation chain's aggregation time.
pub struct CalChainTimeRule;

impl Rule for CalChainTimeRule {
    fn name(&self) -> &'static str {
        "cal-chain-time"
    }

    fn evaluate(&self, signature: &Signature, _ctx: &VerificationContext) -> RuleOutcome {
        let Some(calendar) = &signature.calendar_chain else {
            return RuleOutcome::Inconclusive;
        };
        let Some(last) = signature.aggregation_chains.last() else {
            return RuleOutcome::Fail(VerError::AggrChainInternalInconsistent);
        };
        if calendar.aggregation_time == last.aggr_time {
            RuleOutcome::Ok
        } else {
            RuleOutcome::Fail(VerError::CalChainTimeMismatch)
        }
    }
}

/// The calendar chain's computed root must equal the imprint carried by
/// whichever attestation the signature has (calendar auth record or
/// publication record).
pub struct CalChainRootRule;

impl Rule for CalChainRootRule {
    fn name(&self) -> &'static str {
        "cal-chain-root"
    }

    fn evaluate(&self, signature: &Signature, _ctx: &VerificationContext) -> RuleOutcome {
        let Some(calendar) = &signature.calendar_chain else {
            return RuleOutcome::Inconclusive;
        };
        let root = match calendar.root() {
            Ok(root) => root,
            Err(_) => return RuleOutcome::Fail(VerError::CalChainRootMismatch),
        };
        let expected = match &signature.attestation {
            Attestation::CalendarAuth(record) => &record.published_hash,
            Attestation::Publication(record) => &record.publication_hash,
        };
        if &root == expected {
            RuleOutcome::Ok
        } else {
            RuleOutcome::Fail(VerError::CalChainRootMismatch)
        }
    }
}

/// The calendar authentication record's PKI signature must verify against
/// the configured trust store. Inconclusive for publication-based
/// signatures, which carry no PKI signature to check.
pub struct AuthRecordPkiRule;

impl Rule for AuthRecordPkiRule {
    fn name(&self) -> &'static str {
        "auth-record-pki"
    }

    fn evaluate(&self, signature: &Signature, ctx: &VerificationContext) -> RuleOutcome {
        let Attestation::CalendarAuth(record) = &signature.attestation else {
            return RuleOutcome::Inconclusive;
        };
        let signed_data = published_data_bytes(record.publication_time, &record.published_hash);
        match pki::verify(ctx.trust_store.as_ref(), &record.signature, &signed_data) {
            Ok(_) => RuleOutcome::Ok,
            Err(_) => RuleOutcome::Fail(VerError::PkiSignatureInvalid),
        }
    }
}

fn published_data_bytes(time: u64, hash: &ksi_core::Imprint) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 1 + hash.digest().len());
    out.extend_from_slice(&time.to_be_bytes());
    out.extend_from_slice(&hash.to_bytes());
    out
}

/// The signature's calendar root must match a record in the configured
/// publications file at the calendar chain's publication time.
/// Inconclusive without a publications file, or without a calendar chain
/// to derive a root and time from.
pub struct PublicationLookupRule;

impl Rule for PublicationLookupRule {
    fn name(&self) -> &'static str {
        "publication-lookup"
    }

    fn evaluate(&self, signature: &Signature, ctx: &VerificationContext) -> RuleOutcome {
        let Some(pubfile) = &ctx.publications_file else {
            return RuleOutcome::Inconclusive;
        };
        let Some(calendar) = &signature.calendar_chain else {
            return RuleOutcome::Inconclusive;
        };
        let root = match calendar.root() {
            Ok(root) => root,
            Err(_) => return RuleOutcome::Fail(VerError::CalChainRootMismatch),
        };
        let found = pubfile
            .publications
            .iter()
            .any(|p| p.publication_time == calendar.publication_time && p.publication_hash == root);
        if found {
            RuleOutcome::Ok
        } else {
            RuleOutcome::Fail(VerError::PublicationNotFound)
        }
    }
}

/// A caller-supplied publication (typically decoded from a publication
/// string read out-of-band) must match the signature's calendar root when
/// its time lines up with the calendar chain's publication time.
/// Inconclusive when the times don't match — this signature simply isn't
/// what the user publication attests to, which is not itself a failure.
pub struct UserPublicationRule;

impl Rule for UserPublicationRule {
    fn name(&self) -> &'static str {
        "user-publication"
    }

    fn evaluate(&self, signature: &Signature, ctx: &VerificationContext) -> RuleOutcome {
        let Some(user_publication) = &ctx.user_publication else {
            return RuleOutcome::Inconclusive;
        };
        let Some(calendar) = &signature.calendar_chain else {
            return RuleOutcome::Inconclusive;
        };
        if calendar.publication_time != user_publication.publication_time {
            return RuleOutcome::Inconclusive;
        }
        match calendar.root() {
            Ok(root) if root == user_publication.publication_hash => RuleOutcome::Ok,
            Ok(_) => RuleOutcome::Fail(VerError::UserPublicationMismatch),
            Err(_) => RuleOutcome::Fail(VerError::CalChainRootMismatch),
        }
    }
}

/// A calendar chain freshly returned by the extender for this signature's
/// aggregation time must match the signature's own aggregation root and
/// the extender's chain must compute to the same root the signature
/// already carries (or establish one, if the signature isn't calendar-
/// anchored yet). The fetch itself is the caller's job — see
/// [`crate::context::VerificationContext::extended_calendar_chain`] — so
/// this rule stays a pure comparison, matching spec.md §4.7's "rules are
/// deterministic pure functions".
pub struct ExtenderChainMatchRule;

impl Rule for ExtenderChainMatchRule {
    fn name(&self) -> &'static str {
        "extender-chain-match"
    }

    fn evaluate(&self, signature: &Signature, ctx: &VerificationContext) -> RuleOutcome {
        let Some(fresh) = &ctx.extended_calendar_chain else {
            return RuleOutcome::Inconclusive;
        };
        let stored_root = match signature.aggregate() {
            Ok(root) => root,
            Err(_) => return RuleOutcome::Fail(VerError::AggrChainInternalInconsistent),
        };
        if fresh.input_hash != stored_root {
            return RuleOutcome::Fail(VerError::ExtenderCalChainMismatch);
        }
        let last_aggr_time = signature.aggregation_chains.last().map(|c| c.aggr_time);
        if Some(fresh.aggregation_time) != last_aggr_time {
            return RuleOutcome::Fail(VerError::ExtenderCalChainMismatch);
        }
        let fresh_root = match fresh.root() {
            Ok(root) => root,
            Err(_) => return RuleOutcome::Fail(VerError::ExtenderCalChainMismatch),
        };
        match signature.calendar_root() {
            Ok(Some(stored)) if stored == fresh_root => RuleOutcome::Ok,
            Ok(Some(_)) => RuleOutcome::Fail(VerError::ExtenderCalChainMismatch),
            Ok(None) => RuleOutcome::Ok,
            Err(_) => RuleOutcome::Fail(VerError::ExtenderCalChainMismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::VerificationContext;
    use ksi_proto::pki::StaticTrustStore;
    use ksi_proto::signature::{
        AggregationChain, AggregationLink, CalendarChain, CalendarLink, LinkDirection,
        PublicationRecord,
    };
    use ksi_core::{HashAlgorithm, Imprint};
    use std::sync::Arc;

    fn imprint(byte: u8) -> Imprint {
        Imprint::of(HashAlgorithm::Sha256, &[byte])
    }

    fn sample_signature() -> Signature {
        let chain = AggregationChain {
            input_hash: Imprint::of(HashAlgorithm::Sha256, b"abc"),
            input_level: 0,
            aggr_time: 1_398_866_256,
            chain_index: vec![1],
            links: vec![AggregationLink {
                direction: LinkDirection::Left,
                sibling: imprint(2),
                level_correction: 0,
                metadata: None,
            }],
        };
        let (root, _level) = chain.apply().unwrap();
        let calendar = CalendarChain {
            publication_time: 1_398_866_256,
            aggregation_time: 1_398_866_256,
            input_hash: root,
            links: vec![],
        };
        let cal_root = calendar.root().unwrap();
        Signature {
            aggregation_chains: vec![chain],
            calendar_chain: Some(calendar),
            attestation: Attestation::Publication(PublicationRecord {
                publication_time: 1_398_866_256,
                publication_hash: cal_root,
                publication_refs: vec![],
                repository_uris: vec![],
            }),
        }
    }

    fn ctx() -> VerificationContext {
        VerificationContext::new(Arc::new(StaticTrustStore::with_fingerprint([0u8; 32])))
    }

    #[test]
    fn internal_chain_rules_pass_on_a_consistent_signature() {
        let sig = sample_signature();
        let ctx = ctx();
        assert_eq!(AggrChainConsistencyRule.evaluate(&sig, &ctx), RuleOutcome::Ok);
        assert_eq!(AggrChainTimeRule.evaluate(&sig, &ctx), RuleOutcome::Ok);
        assert_eq!(CalChainInputRule.evaluate(&sig, &ctx), RuleOutcome::Ok);
        assert_eq!(CalChainTimeRule.evaluate(&sig, &ctx), RuleOutcome::Ok);
        assert_eq!(CalChainRootRule.evaluate(&sig, &ctx), RuleOutcome::Ok);
    }

    #[test]
    fn doc_hash_rule_is_inconclusive_without_a_document_hash() {
        let sig = sample_signature();
        assert_eq!(AggrChainDocHashRule.evaluate(&sig, &ctx()), RuleOutcome::Inconclusive);
    }

    #[test]
    fn doc_hash_rule_fails_on_altered_document_hash() {
        let sig = sample_signature();
        let mut c = ctx();
        c.document_hash = Some(Imprint::of(HashAlgorithm::Sha256, b"not abc"));
        assert_eq!(
            AggrChainDocHashRule.evaluate(&sig, &c),
            RuleOutcome::Fail(VerError::AggrChainInputHashMismatch)
        );
    }

    #[test]
    fn doc_hash_rule_passes_on_matching_document_hash() {
        let sig = sample_signature();
        let mut c = ctx();
        c.document_hash = Some(Imprint::of(HashAlgorithm::Sha256, b"abc"));
        assert_eq!(AggrChainDocHashRule.evaluate(&sig, &c), RuleOutcome::Ok);
    }

    #[test]
    fn altered_aggregation_time_breaks_time_consistency() {
        let mut sig = sample_signature();
        sig.aggregation_chains[0].aggr_time += 1;
        assert_eq!(
            CalChainTimeRule.evaluate(&sig, &ctx()),
            RuleOutcome::Fail(VerError::CalChainTimeMismatch)
        );
    }

    /// A single aggregation chain whose time was altered desyncs from the
    /// calendar chain it registers against — caught here, not just by
    /// `CalChainTimeRule`, since this rule runs first in `policies::internal()`.
    #[test]
    fn altered_aggregation_time_is_caught_even_with_a_single_chain() {
        let mut sig = sample_signature();
        sig.aggregation_chains[0].aggr_time += 1;
        assert_eq!(
            AggrChainTimeRule.evaluate(&sig, &ctx()),
            RuleOutcome::Fail(VerError::AggrChainTimeInconsistent)
        );
    }

    #[test]
    fn publication_lookup_finds_a_matching_record() {
        let sig = sample_signature();
        let calendar = sig.calendar_chain.as_ref().unwrap();
        let root = calendar.root().unwrap();
        let pubfile_record = PublicationRecord {
            publication_time: calendar.publication_time,
            publication_hash: root,
            publication_refs: vec![],
            repository_uris: vec![],
        };
        let pubfile = ksi_proto::pubfile::PublicationsFile {
            header: ksi_proto::pubfile::PubFileHeader {
                version: 1,
                creation_time: 0,
                repository_uri: None,
            },
            publications: vec![pubfile_record],
            certificates: vec![],
            signed_bytes_len: 0,
            signature: ksi_proto::pki::PkiSignature {
                signer_cert: vec![],
                signature_bytes: vec![],
                signed_data_alg: HashAlgorithm::Sha256,
            },
        };
        let mut c = ctx();
        c.publications_file = Some(Arc::new(pubfile));
        assert_eq!(PublicationLookupRule.evaluate(&sig, &c), RuleOutcome::Ok);
    }

    #[test]
    fn calendar_link_sibling_mismatch_breaks_cal_chain_root() {
        let mut sig = sample_signature();
        if let Some(chain) = sig.calendar_chain.as_mut() {
            chain.links.push(CalendarLink {
                direction: LinkDirection::Left,
                sibling: imprint(99),
            });
        }
        assert_eq!(
            CalChainRootRule.evaluate(&sig, &ctx()),
            RuleOutcome::Fail(VerError::CalChainRootMismatch)
        );
    }
}
