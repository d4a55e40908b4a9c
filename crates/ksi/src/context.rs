//! Process-wide configuration and the public entry points built on top of
//! it (spec.md C8): transports, publications handling, policy defaults,
//! and the `sign`/`sign_async`/`extend`/`verify` surface.

use crate::error::{record, ContextError, DiagnosticRing, Result};
use ksi_async::{AsyncOptions, AsyncService};
use ksi_core::Imprint;
use ksi_net::pdu::{self, ExtendRequest, PduVersion, SignRequest as PduSignRequest};
use ksi_net::Transport;
use ksi_proto::pki::{TrustStore, X509TrustStore};
use ksi_proto::pubfile::PublicationsFile;
use ksi_proto::signature::{Attestation, PublicationRecord, Signature};
use ksi_verify::{Policy, PolicyResult, VerificationContext};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Resolves spec.md §9's open question on publications-file signer
/// identity: configurable rather than compiled in, defaulting to the
/// historical subject-email match but allowing a caller to pin a full
/// certificate fingerprint instead.
#[derive(Clone, Debug, Default)]
pub struct PublicationsFileTrustPolicy {
    pub subject_email: Option<String>,
    pub pinned_cert_sha256: Option<[u8; 32]>,
}

struct PubFileCache {
    entry: Option<(Arc<PublicationsFile>, Instant)>,
    ttl: Duration,
}

/// Owns everything a signing/verification session needs: the aggregator
/// and (optional) extender transports, publications-file fetch/cache/trust
/// policy, PDU version options, a default verification policy, and the
/// diagnostic ring buffer from spec.md §7.
pub struct Context {
    aggregator: Arc<dyn Transport>,
    extender: Option<Arc<dyn Transport>>,
    publications_url: Option<String>,
    trust_store: Arc<dyn TrustStore>,
    pubfile_cache: RwLock<PubFileCache>,
    default_policy: Policy,
    aggr_pdu_version: PduVersion,
    ext_pdu_version: PduVersion,
    next_request_id: AtomicU64,
    diagnostics: Mutex<DiagnosticRing>,
}

impl Context {
    pub fn builder(aggregator: Arc<dyn Transport>) -> ContextBuilder {
        ContextBuilder::new(aggregator)
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed).max(1)
    }

    fn note(&self, file: &'static str, line: u32, err: impl std::fmt::Display) {
        self.diagnostics.lock().push(file, line, err.to_string());
    }

    /// Last `N` diagnostics recorded by this context (spec.md §7), most
    /// recent last.
    pub fn diagnostics(&self) -> Vec<crate::error::Diagnostic> {
        self.diagnostics.lock().entries().cloned().collect()
    }

    /// Blocking, synchronous single-request sign: one aggregator round
    /// trip (spec.md §2's signing data flow).
    pub async fn sign(&self, hash: Imprint, level: u8) -> Result<Signature> {
        let request_id = self.next_request_id();
        let body = pdu::build_sign_request(
            &PduSignRequest {
                request_id,
                request_hash: Some(hash),
                request_level: if level > 0 { Some(level) } else { None },
                request_config: false,
            },
            self.aggr_pdu_version,
        )
        .map_err(|e| record!(self_diag(self), ContextError::from(e)))?;

        let handle = self
            .aggregator
            .send_sign_request(&body)
            .await
            .map_err(|e| record!(self_diag(self), ContextError::from(e)))?;

        let bytes = handle
            .get_response_bytes()
            .ok_or_else(|| record!(self_diag(self), ContextError::NoSignature {
                request_id,
                detail: "transport returned no response body".into(),
            }))?;

        let response = pdu::parse_sign_response(bytes)
            .map_err(|e| record!(self_diag(self), ContextError::from(e)))?;

        if response.request_id != request_id {
            warn!(
                sent = request_id,
                got = response.request_id,
                "aggregator response request-id did not match"
            );
        }
        if let Some((code, message)) = response.error {
            return Err(record!(
                self_diag(self),
                ContextError::NoSignature {
                    request_id,
                    detail: message.unwrap_or_else(|| format!("server error {code}")),
                }
            ));
        }
        response.signature.ok_or_else(|| {
            record!(
                self_diag(self),
                ContextError::NoSignature {
                    request_id,
                    detail: "response carried no signature (push-config only?)".into(),
                }
            )
        })
    }

    /// Hand the caller a fully configured pipeline for the asynchronous
    /// signing path (spec.md C6): up to `cache_size` in-flight requests
    /// driven cooperatively via repeated `run()` calls.
    pub fn sign_async(&self, options: AsyncOptions) -> AsyncService {
        AsyncService::new(
            Arc::clone(&self.aggregator),
            options.with_pdu_version(self.aggr_pdu_version),
        )
    }

    /// Replace a signature's calendar chain with one obtained from the
    /// extender (spec.md §4.3 "Extension"), preserving the aggregation
    /// chains and aggregation time.
    pub async fn extend(&self, signature: &Signature, target_time: Option<u64>) -> Result<Signature> {
        let extender = self
            .extender
            .as_ref()
            .ok_or_else(|| record!(self_diag(self), ContextError::NoExtender))?;

        let aggregation_time = signature
            .aggregation_chains
            .last()
            .map(|c| c.aggr_time)
            .ok_or_else(|| {
                record!(
                    self_diag(self),
                    ContextError::NoCalendarChain("signature has no aggregation chains".into())
                )
            })?;

        let publication_time = match target_time {
            Some(t) => Some(t),
            None => self
                .publications_file()
                .await
                .ok()
                .and_then(|file| file.find_publication_at_or_after(aggregation_time).map(|p| p.publication_time)),
        };

        let request_id = self.next_request_id();
        let body = pdu::build_extend_request(
            &ExtendRequest {
                request_id,
                aggregation_time,
                publication_time,
            },
            self.ext_pdu_version,
        )
        .map_err(|e| record!(self_diag(self), ContextError::from(e)))?;

        let handle = extender
            .send_extend_request(&body)
            .await
            .map_err(|e| record!(self_diag(self), ContextError::from(e)))?;
        let bytes = handle
            .get_response_bytes()
            .ok_or_else(|| record!(self_diag(self), ContextError::NoCalendarChain("no response body".into())))?;
        let response = pdu::parse_extend_response(bytes)
            .map_err(|e| record!(self_diag(self), ContextError::from(e)))?;

        if let Some(code) = response.error {
            return Err(record!(
                self_diag(self),
                ContextError::NoCalendarChain(format!("extender error {code}"))
            ));
        }
        let new_calendar = response
            .calendar_chain
            .ok_or_else(|| record!(self_diag(self), ContextError::NoCalendarChain("response carried no calendar chain".into())))?;

        let root = new_calendar
            .root()
            .map_err(|e| record!(self_diag(self), ContextError::from(e)))?;

        let attestation = self
            .publications_file()
            .await
            .ok()
            .and_then(|file| {
                file.publications
                    .iter()
                    .find(|p| p.publication_time == new_calendar.publication_time && p.publication_hash == root)
                    .cloned()
            })
            .map(Attestation::Publication)
            .unwrap_or_else(|| {
                Attestation::Publication(PublicationRecord {
                    publication_time: new_calendar.publication_time,
                    publication_hash: root,
                    publication_refs: vec![],
                    repository_uris: vec![],
                })
            });

        signature
            .extend(new_calendar, attestation)
            .map_err(|e| record!(self_diag(self), ContextError::Proto(e)))
    }

    /// Verify `signature` against `policy` (the context's default policy,
    /// `GENERAL`, if `None`), using only internal consistency and — if a
    /// publications file is configured — the publications-file-based
    /// fallback. For a caller that also holds the original document hash
    /// or a user publication, use [`Context::verify_with`].
    pub async fn verify(&self, signature: &Signature, policy: Option<&Policy>) -> PolicyResult {
        self.verify_with(signature, None, 0, None, policy).await
    }

    /// Full-featured verification: supply the document hash being
    /// checked, the local aggregation level it was signed at, and/or a
    /// user-supplied publication, on top of whatever publications file and
    /// trust store the context already carries.
    pub async fn verify_with(
        &self,
        signature: &Signature,
        document_hash: Option<Imprint>,
        local_level: u8,
        user_publication: Option<PublicationRecord>,
        policy: Option<&Policy>,
    ) -> PolicyResult {
        let mut ctx = VerificationContext::new(Arc::clone(&self.trust_store)).with_local_level(local_level);
        if let Some(hash) = document_hash {
            ctx = ctx.with_document_hash(hash);
        }
        if let Some(publication) = user_publication {
            ctx = ctx.with_user_publication(publication);
        }
        if let Ok(file) = self.publications_file().await {
            ctx = ctx.with_publications_file(file);
        }
        let policy = policy.unwrap_or(&self.default_policy);
        policy.evaluate(signature, &ctx)
    }

    /// Fetch (or return the cached copy of, if within TTL) the
    /// publications file, verifying its PKI signature against the
    /// configured trust store (spec.md §4.4, §5).
    pub async fn publications_file(&self) -> Result<Arc<PublicationsFile>> {
        {
            let cache = self.pubfile_cache.read();
            if let Some((file, fetched_at)) = &cache.entry {
                if fetched_at.elapsed() < cache.ttl {
                    return Ok(Arc::clone(file));
                }
            }
        }

        let url = self
            .publications_url
            .as_deref()
            .ok_or_else(|| record!(self_diag(self), ContextError::NoPublicationsUrl))?;
        let transport = ksi_net::transport_for_uri(url).map_err(|e| record!(self_diag(self), ContextError::from(e)))?;
        let handle = transport
            .send_publications_request()
            .await
            .map_err(|e| record!(self_diag(self), ContextError::from(e)))?;
        let bytes = handle
            .get_response_bytes()
            .ok_or_else(|| record!(self_diag(self), ContextError::NoPublicationsUrl))?;

        let file = PublicationsFile::parse(bytes).map_err(|e| record!(self_diag(self), ContextError::from(e)))?;
        file.verify(bytes, self.trust_store.as_ref())
            .map_err(|_| record!(self_diag(self), ContextError::UntrustedPublicationsFile))?;
        debug!(publications = file.publications.len(), "publications file fetched and verified");

        let file = Arc::new(file);
        let mut cache = self.pubfile_cache.write();
        cache.entry = Some((Arc::clone(&file), Instant::now()));
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ksi_core::tags::{aggregation, chain_link};
    use ksi_core::{HashAlgorithm, Tlv};
    use ksi_net::{RequestHandle, RequestKind, TransportError};

    /// A mock aggregator that echoes the submitted document hash into a
    /// freshly assembled, internally-consistent signature — the same
    /// "canned response" shape spec.md §8 scenario 1 describes.
    struct MockAggregator;

    #[async_trait]
    impl Transport for MockAggregator {
        async fn send_sign_request(&self, body: &[u8]) -> ksi_net::error::Result<RequestHandle> {
            let tlvs = ksi_core::tlv::parse_all(body).map_err(TransportError::from)?;
            let request = &tlvs[0].as_children().map_err(TransportError::from)?[0];
            let children = request.as_children().map_err(TransportError::from)?;
            let request_id = children
                .iter()
                .find(|c| c.tag() == aggregation::REQUEST_ID)
                .unwrap()
                .as_uint()
                .map_err(TransportError::from)?;
            let request_hash = children
                .iter()
                .find(|c| c.tag() == aggregation::REQUEST_HASH)
                .unwrap()
                .payload()
                .to_vec();

            let mut handle = RequestHandle::new(RequestKind::Sign, body.to_vec());
            handle.set_response_bytes(build_signed_response(request_id, &request_hash));
            Ok(handle)
        }

        async fn send_extend_request(&self, _body: &[u8]) -> ksi_net::error::Result<RequestHandle> {
            unimplemented!("not exercised by the basic-sign scenario")
        }

        async fn send_publications_request(&self) -> ksi_net::error::Result<RequestHandle> {
            unimplemented!("not exercised by the basic-sign scenario")
        }
    }

    /// Builds a complete aggregation-PDU response whose aggregation chain
    /// echoes `request_hash`, with a calendar chain and publication record
    /// that its own `root()`/`apply()` math makes mutually consistent —
    /// the wire-level twin of `ksi-verify::rules::tests::sample_signature`.
    fn build_signed_response(request_id: u64, request_hash: &[u8]) -> Vec<u8> {
        let sibling = Imprint::of(HashAlgorithm::Sha256, b"sibling");
        let aggr_time = 1_398_866_256u64;

        let chain = Tlv::encode_children(
            ksi_core::tags::AGGREGATION_CHAIN,
            &[
                Tlv::encode_uint(0x02, aggr_time).unwrap(),
                Tlv::raw(0x05, request_hash.to_vec()).unwrap(),
                Tlv::raw(chain_link::SIBLING_LEFT, sibling.to_bytes()).unwrap(),
            ],
        )
        .unwrap();

        let aggregation_root = ksi_proto::signature::AggregationChain {
            input_hash: Imprint::from_bytes(request_hash).unwrap(),
            input_level: 0,
            aggr_time,
            chain_index: vec![1],
            links: vec![ksi_proto::signature::AggregationLink {
                direction: ksi_proto::signature::LinkDirection::Left,
                sibling: sibling.clone(),
                level_correction: 0,
                metadata: None,
            }],
        }
        .apply()
        .unwrap()
        .0;

        let calendar = Tlv::encode_children(
            ksi_core::tags::CALENDAR_CHAIN,
            &[
                Tlv::encode_uint(0x01, aggr_time).unwrap(),
                Tlv::encode_uint(0x02, aggr_time).unwrap(),
                Tlv::raw(0x05, aggregation_root.to_bytes()).unwrap(),
            ],
        )
        .unwrap();

        let publication = Tlv::encode_children(
            ksi_core::tags::PUBLICATION_RECORD,
            &[
                Tlv::encode_uint(0x02, aggr_time).unwrap(),
                Tlv::raw(0x04, aggregation_root.to_bytes()).unwrap(),
            ],
        )
        .unwrap();

        let response = Tlv::encode_children(
            aggregation::RESPONSE,
            &[
                Tlv::encode_uint(aggregation::REQUEST_ID, request_id).unwrap(),
                chain,
                calendar,
                publication,
            ],
        )
        .unwrap();
        let pdu = Tlv::encode_children(aggregation::PDU, &[response]).unwrap();
        pdu.to_bytes().unwrap()
    }

    /// spec.md §8 scenario 1: signing `sha256("abc")` against a mock
    /// aggregator returns a signature whose document hash is the input
    /// hash, and `INTERNAL` verification succeeds.
    #[tokio::test]
    async fn basic_sign_then_internal_verify_succeeds() {
        let document_hash = Imprint::of(HashAlgorithm::Sha256, b"abc");
        let context = Context::builder(Arc::new(MockAggregator)).build();

        let signature = context.sign(document_hash.clone(), 0).await.unwrap();
        assert_eq!(signature.aggregation_chains[0].input_hash, document_hash);

        let result = context
            .verify_with(&signature, Some(document_hash), 0, None, Some(&ksi_verify::policies::internal()))
            .await;
        assert!(result.outcome.is_ok(), "expected INTERNAL to succeed: {:?}", result);
    }

    /// spec.md §8 scenario 6: altering a chain's aggregation time after
    /// the fact breaks internal consistency and the policy fails rather
    /// than merely going inconclusive.
    #[tokio::test]
    async fn altered_aggregation_time_fails_internal_verify() {
        let document_hash = Imprint::of(HashAlgorithm::Sha256, b"abc");
        let context = Context::builder(Arc::new(MockAggregator)).build();

        let mut signature = context.sign(document_hash.clone(), 0).await.unwrap();
        signature.aggregation_chains[0].aggr_time += 1;

        let result = context
            .verify_with(&signature, Some(document_hash), 0, None, Some(&ksi_verify::policies::internal()))
            .await;
        assert!(matches!(
            result.outcome,
            ksi_verify::PolicyOutcome::Fail(ksi_verify::VerError::AggrChainTimeInconsistent, _)
        ));
    }
}

/// Small helper so the `record!` macro (which wants `&mut DiagnosticRing`)
/// can be used against `&Context`'s interior-mutable ring without every
/// call site spelling out the lock.
struct DiagRef<'a>(&'a Context);

impl<'a> DiagRef<'a> {
    fn push(&self, file: &'static str, line: u32, message: impl Into<String>) {
        self.0.note(file, line, message.into());
    }
}

fn self_diag(ctx: &Context) -> DiagRef<'_> {
    DiagRef(ctx)
}

/// Assembles a [`Context`] the way `gossipd::config::Config` assembles
/// daemon config, but as a fluent builder rather than a `clap::Parser` —
/// `Context` is a library entry point, not a CLI surface.
pub struct ContextBuilder {
    aggregator: Arc<dyn Transport>,
    extender: Option<Arc<dyn Transport>>,
    publications_url: Option<String>,
    trust_policy: PublicationsFileTrustPolicy,
    default_policy: Option<Policy>,
    aggr_pdu_version: PduVersion,
    ext_pdu_version: PduVersion,
    pubfile_ttl: Duration,
}

impl ContextBuilder {
    pub fn new(aggregator: Arc<dyn Transport>) -> Self {
        Self {
            aggregator,
            extender: None,
            publications_url: None,
            trust_policy: PublicationsFileTrustPolicy::default(),
            default_policy: None,
            aggr_pdu_version: PduVersion::V1,
            ext_pdu_version: PduVersion::V1,
            pubfile_ttl: Duration::from_secs(3600),
        }
    }

    pub fn extender(mut self, extender: Arc<dyn Transport>) -> Self {
        self.extender = Some(extender);
        self
    }

    pub fn publications_url(mut self, url: impl Into<String>) -> Self {
        self.publications_url = Some(url.into());
        self
    }

    pub fn trust_policy(mut self, policy: PublicationsFileTrustPolicy) -> Self {
        self.trust_policy = policy;
        self
    }

    pub fn default_policy(mut self, policy: Policy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    pub fn aggr_pdu_version(mut self, version: PduVersion) -> Self {
        self.aggr_pdu_version = version;
        self
    }

    pub fn ext_pdu_version(mut self, version: PduVersion) -> Self {
        self.ext_pdu_version = version;
        self
    }

    pub fn publications_file_ttl(mut self, ttl: Duration) -> Self {
        self.pubfile_ttl = ttl;
        self
    }

    pub fn build(self) -> Context {
        let mut trust_store = X509TrustStore::new();
        if let Some(email) = &self.trust_policy.subject_email {
            trust_store = trust_store.trust_email(email.clone());
        }
        if let Some(fingerprint) = self.trust_policy.pinned_cert_sha256 {
            trust_store = trust_store.trust_fingerprint(fingerprint);
        }

        Context {
            aggregator: self.aggregator,
            extender: self.extender,
            publications_url: self.publications_url,
            trust_store: Arc::new(trust_store),
            pubfile_cache: RwLock::new(PubFileCache {
                entry: None,
                ttl: self.pubfile_ttl,
            }),
            default_policy: self.default_policy.unwrap_or_else(ksi_verify::policies::general),
            aggr_pdu_version: self.aggr_pdu_version,
            ext_pdu_version: self.ext_pdu_version,
            next_request_id: AtomicU64::new(1),
            diagnostics: Mutex::new(DiagnosticRing::default()),
        }
    }
}
