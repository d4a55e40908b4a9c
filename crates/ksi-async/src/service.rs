//! The asynchronous pipeline itself (spec.md §4.6): admission, a FIFO send
//! queue, an in-flight map keyed by request-id, and the single-threaded
//! cooperative `run` suspension point.
//!
//! Grounded on `gossipd::server::Server`'s pattern of guarding shared maps
//! with a `parking_lot::Mutex`/`RwLock` and draining queues inside one
//! `tokio::select!`-style loop iteration (`gossipd::sync::SyncManager`),
//! generalized here from "daemon polls a socket forever" to "library
//! exposes one non-blocking `run()` call per iteration".

use crate::error::{AsyncError, Result};
use crate::handle::{AsyncHandle, ErrorCode, HandleState, SignRequest};
use ksi_core::Imprint;
use ksi_net::pdu::{self, PduVersion};
pub use ksi_net::pdu::PushConfig;
use ksi_net::Transport;
use ksi_proto::signature::Signature;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// `ASYNC_OPT_*` options from spec.md §6, all with the spec's defaults.
#[derive(Clone, Debug)]
pub struct AsyncOptions {
    connect_timeout: Duration,
    send_timeout: Duration,
    receive_timeout: Duration,
    cache_size: usize,
    max_request_count: usize,
    pdu_version: PduVersion,
}

impl Default for AsyncOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(10),
            cache_size: 1,
            max_request_count: 1,
            pdu_version: PduVersion::V1,
        }
    }
}

impl AsyncOptions {
    pub fn with_cache_size(mut self, size: usize) -> Result<Self> {
        self.set_cache_size(size)?;
        Ok(self)
    }

    pub fn with_max_request_count(mut self, count: usize) -> Self {
        self.max_request_count = count;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// `AGGR_PDU_VER` (spec.md §6) for requests this service dispatches.
    pub fn with_pdu_version(mut self, version: PduVersion) -> Self {
        self.pdu_version = version;
        self
    }

    /// The cache size may grow but never shrink at runtime (spec.md §6).
    pub fn set_cache_size(&mut self, size: usize) -> Result<()> {
        if size < self.cache_size {
            return Err(AsyncError::InvalidArgument(
                "async request cache size may not be decreased",
            ));
        }
        self.cache_size = size;
        Ok(())
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }
}

/// Result of a single [`AsyncService::run`] call.
pub struct RunOutcome {
    pub terminal: Option<AsyncHandle>,
    pub pending: usize,
}

struct Inner {
    queued: VecDeque<u64>,
    in_flight: HashMap<u64, AsyncHandle>,
    completed: VecDeque<AsyncHandle>,
    next_request_id: u64,
    first_config_requester: Option<u64>,
    pending_push_configs: VecDeque<PushConfig>,
}

/// Owns the endpoint, the bounded cache, and the options spec.md §3's
/// "Async service" entry names. `add_request`/`run`/`free_handle` are the
/// whole public surface spec.md §4.6 requires; everything else is
/// bookkeeping behind a `parking_lot::Mutex`, matching
/// `gossipd::server::Server`'s `peers: RwLock<HashMap<..>>` shape.
pub struct AsyncService {
    transport: Arc<dyn Transport>,
    options: AsyncOptions,
    inner: Mutex<Inner>,
}

impl AsyncService {
    pub fn new(transport: Arc<dyn Transport>, options: AsyncOptions) -> Self {
        Self {
            transport,
            options,
            inner: Mutex::new(Inner {
                queued: VecDeque::new(),
                in_flight: HashMap::new(),
                completed: VecDeque::new(),
                next_request_id: 1,
                first_config_requester: None,
                pending_push_configs: VecDeque::new(),
            }),
        }
    }

    pub fn options(&self) -> &AsyncOptions {
        &self.options
    }

    /// Admission (spec.md §4.6 "Admission"): validates the request, assigns
    /// a monotonically increasing request-id that never collides with a
    /// live in-flight id, and enqueues it for the next `run`.
    pub fn add_request(&self, request: SignRequest) -> Result<u64> {
        if request.request_hash.is_none() && !request.request_config {
            return Err(AsyncError::InvalidArgument("empty request: no hash and no config requested"));
        }
        let mut inner = self.inner.lock();
        let in_flight_and_queued = inner.in_flight.len() + inner.queued.len();
        if in_flight_and_queued >= self.options.cache_size {
            return Err(AsyncError::CacheFull);
        }

        let request_id = loop {
            let candidate = inner.next_request_id;
            inner.next_request_id = inner.next_request_id.wrapping_add(1).max(1);
            if !inner.in_flight.contains_key(&candidate) {
                break candidate;
            }
        };

        let wants_config = request.request_config;
        let handle = AsyncHandle::new(request_id, request, self.options.pdu_version);
        inner.in_flight.insert(request_id, handle);
        inner.queued.push_back(request_id);
        if wants_config && inner.first_config_requester.is_none() {
            inner.first_config_requester = Some(request_id);
        }
        Ok(request_id)
    }

    /// Cancellation (spec.md §4.6 "Cancellation"): removes the in-flight
    /// entry immediately; a response that later arrives for this id is
    /// matched against the map, found absent, and dropped silently.
    pub fn free_handle(&self, request_id: u64) {
        let mut inner = self.inner.lock();
        inner.in_flight.remove(&request_id);
        inner.queued.retain(|id| *id != request_id);
        if inner.first_config_requester == Some(request_id) {
            inner.first_config_requester = None;
        }
    }

    pub fn pending_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.in_flight.len() + inner.queued.len()
    }

    /// A push-config response delivered globally because no handle claimed
    /// it first (spec.md §4.6/§9's resolved Open Question).
    pub fn poll_push_config(&self) -> Option<PushConfig> {
        self.inner.lock().pending_push_configs.pop_front()
    }

    /// One non-blocking I/O round (spec.md §4.6 "Scheduling model"): flush
    /// up to `max_request_count` queued handles in FIFO order, await their
    /// responses, correlate by request-id, apply the receive timeout, and
    /// return at most one newly-terminal handle plus the current pending
    /// count.
    ///
    /// The concrete transports in `ksi-net` complete a round trip inside a
    /// single `send_sign_request` call rather than exposing a raw
    /// non-blocking socket, so this loop's "dispatch" and "receive" phases
    /// happen back to back per flushed handle instead of being interleaved
    /// across the whole in-flight set the way a raw-socket implementation
    /// would; the externally observable contract — bounded work per call,
    /// one terminal handle returned, everything else staying queued — is
    /// unchanged.
    pub async fn run(&self) -> Result<RunOutcome> {
        self.check_timeouts();

        let batch: Vec<u64> = {
            let mut inner = self.inner.lock();
            let mut batch = Vec::new();
            for _ in 0..self.options.max_request_count {
                match inner.queued.pop_front() {
                    Some(id) => batch.push(id),
                    None => break,
                }
            }
            batch
        };

        for request_id in batch {
            self.dispatch_one(request_id).await;
        }

        let mut inner = self.inner.lock();
        let terminal = inner.completed.pop_front();
        let pending = inner.in_flight.len() + inner.queued.len();
        Ok(RunOutcome { terminal, pending })
    }

    async fn dispatch_one(&self, request_id: u64) {
        let (hash, level, request_config, pdu_version) = {
            let mut inner = self.inner.lock();
            let Some(handle) = inner.in_flight.get_mut(&request_id) else {
                // Freed between admission and dispatch; nothing to do.
                return;
            };
            handle.transition(HandleState::WaitingForDispatch);
            (
                handle.request.request_hash.clone(),
                handle.request.request_level,
                handle.request.request_config,
                handle.pdu_version,
            )
        };

        let req = pdu::SignRequest {
            request_id,
            request_hash: hash,
            request_level: level,
            request_config,
        };
        let body = match pdu::build_sign_request(&req, pdu_version) {
            Ok(b) => b,
            Err(e) => {
                self.finish_with_error(request_id, ErrorCode::InvalidArgument, e.to_string());
                return;
            }
        };

        {
            let mut inner = self.inner.lock();
            if let Some(handle) = inner.in_flight.get_mut(&request_id) {
                handle.transition(HandleState::WaitingForResponse);
            } else {
                return;
            }
        }

        match self.transport.send_sign_request(&body).await {
            Ok(reply) => {
                let Some(bytes) = reply.get_response_bytes() else {
                    self.finish_with_error(request_id, ErrorCode::NetworkTimeout, "no response body");
                    return;
                };
                self.on_response(bytes);
            }
            Err(e) => {
                warn!(request_id, error = %e, "aggregator round trip failed");
                self.finish_with_error(request_id, ErrorCode::NetworkTimeout, e.to_string());
            }
        }
    }

    /// Response correlation (spec.md §4.6 "Receiving"): decode the PDU and
    /// move the matching in-flight handle to its terminal state. A response
    /// for an id no longer tracked (freed, or a stray duplicate) is dropped.
    fn on_response(&self, bytes: &[u8]) {
        if let Ok(Some(config)) = pdu::parse_push_config(bytes) {
            self.deliver_push_config(config);
            return;
        }

        let response = match pdu::parse_sign_response(bytes) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "failed to decode aggregation response");
                return;
            }
        };

        let mut inner = self.inner.lock();
        let Some(handle) = inner.in_flight.get_mut(&response.request_id) else {
            trace!(request_id = response.request_id, "response for unknown/freed handle dropped");
            return;
        };

        if let Some((code, _message)) = response.error {
            handle.error_code = Some(ErrorCode::ServerError(code));
            handle.transition(HandleState::Error);
        } else if let Some(signature) = response.signature {
            handle.response = Some(signature);
            handle.transition(HandleState::ResponseReceived);
        } else {
            handle.transition(HandleState::PushConfigReceived);
        }

        let request_id = response.request_id;
        if let Some(finished) = inner.in_flight.remove(&request_id) {
            inner.completed.push_back(finished);
        }
    }

    /// Routes a request-id-less push config to whichever handle first asked
    /// for one (spec.md §4.6 "Receiving" / §9's resolved Open Question),
    /// marking it terminal with `PushConfigReceived`. Falls back to the
    /// global one-shot queue when no handle claimed one, or when the one
    /// that did was freed in the meantime.
    fn deliver_push_config(&self, config: PushConfig) {
        let mut inner = self.inner.lock();
        if let Some(request_id) = inner.first_config_requester.take() {
            if let Some(mut handle) = inner.in_flight.remove(&request_id) {
                handle.push_config = Some(config);
                handle.transition(HandleState::PushConfigReceived);
                inner.completed.push_back(handle);
                return;
            }
        }
        inner.pending_push_configs.push_back(config);
    }

    fn finish_with_error(&self, request_id: u64, code: ErrorCode, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        if let Some(mut handle) = inner.in_flight.remove(&request_id) {
            handle.fail(code, message);
            inner.completed.push_back(handle);
        }
    }

    /// Timeouts (spec.md §4.6 "Timeouts"): a handle that has sat in
    /// `WaitingForResponse` longer than `receive_timeout` fails with
    /// `network-timeout`.
    fn check_timeouts(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let timed_out: Vec<u64> = inner
            .in_flight
            .iter()
            .filter(|(_, h)| {
                h.state == HandleState::WaitingForResponse
                    && now.duration_since(h.state_changed_at) >= self.options.receive_timeout
            })
            .map(|(id, _)| *id)
            .collect();

        for id in timed_out {
            if let Some(mut handle) = inner.in_flight.remove(&id) {
                handle.fail(ErrorCode::NetworkTimeout, "receive timeout exceeded");
                inner.completed.push_back(handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ksi_net::{RequestHandle, RequestKind, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_sign_request(&self, body: &[u8]) -> ksi_net::error::Result<RequestHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let tlvs = ksi_core::tlv::parse_all(body).map_err(TransportError::from)?;
            let request = &tlvs[0].as_children().map_err(TransportError::from)?[0];
            let request_children = request.as_children().map_err(TransportError::from)?;
            let request_id = request_children
                .iter()
                .find(|c| c.tag() == ksi_core::tags::aggregation::REQUEST_ID)
                .unwrap()
                .as_uint()
                .map_err(TransportError::from)?;
            let request_hash = request_children
                .iter()
                .find(|c| c.tag() == ksi_core::tags::aggregation::REQUEST_HASH)
                .unwrap()
                .payload()
                .to_vec();

            let response_body = build_canned_response(request_id, &request_hash);
            let mut handle = RequestHandle::new(RequestKind::Sign, body.to_vec());
            handle.set_response_bytes(response_body);
            Ok(handle)
        }

        async fn send_extend_request(&self, _body: &[u8]) -> ksi_net::error::Result<RequestHandle> {
            unimplemented!()
        }

        async fn send_publications_request(&self) -> ksi_net::error::Result<RequestHandle> {
            unimplemented!()
        }
    }

    fn build_canned_response(request_id: u64, request_hash: &[u8]) -> Vec<u8> {
        use ksi_core::tags::{aggregation, chain_link};
        use ksi_core::{HashAlgorithm, Tlv};

        let sibling = Imprint::of(HashAlgorithm::Sha256, b"sibling");
        let chain = Tlv::encode_children(
            ksi_core::tags::AGGREGATION_CHAIN,
            &[
                Tlv::encode_uint(0x02, 1_398_866_256).unwrap(),
                Tlv::raw(0x05, request_hash.to_vec()).unwrap(),
                Tlv::raw(chain_link::SIBLING_LEFT, sibling.to_bytes()).unwrap(),
            ],
        )
        .unwrap();

        let publication = Tlv::encode_children(
            ksi_core::tags::PUBLICATION_RECORD,
            &[
                Tlv::encode_uint(0x02, 1_398_866_256).unwrap(),
                Tlv::raw(0x04, Imprint::of(HashAlgorithm::Sha256, b"root").to_bytes()).unwrap(),
            ],
        )
        .unwrap();

        let response = Tlv::encode_children(
            aggregation::RESPONSE,
            &[
                Tlv::encode_uint(aggregation::REQUEST_ID, request_id).unwrap(),
                chain,
                publication,
            ],
        )
        .unwrap();
        let pdu = Tlv::encode_children(aggregation::PDU, &[response]).unwrap();
        pdu.to_bytes().unwrap()
    }

    #[tokio::test]
    async fn submitted_request_completes_with_response_received() {
        let transport = Arc::new(MockTransport {
            calls: AtomicUsize::new(0),
        });
        let service = AsyncService::new(transport, AsyncOptions::default());
        let id = service
            .add_request(SignRequest {
                request_hash: Some(Imprint::of(ksi_core::HashAlgorithm::Sha256, b"abc")),
                request_level: None,
                request_config: false,
            })
            .unwrap();

        let outcome = service.run().await.unwrap();
        let terminal = outcome.terminal.expect("expected one terminal handle");
        assert_eq!(terminal.request_id(), id);
        assert_eq!(terminal.state(), HandleState::ResponseReceived);
        assert_eq!(outcome.pending, 0);
    }

    #[test]
    fn cache_full_rejects_admission_past_capacity() {
        let transport = Arc::new(MockTransport {
            calls: AtomicUsize::new(0),
        });
        let options = AsyncOptions::default().with_cache_size(1).unwrap();
        let service = AsyncService::new(transport, options);
        service
            .add_request(SignRequest {
                request_hash: Some(Imprint::of(ksi_core::HashAlgorithm::Sha256, b"abc")),
                request_level: None,
                request_config: false,
            })
            .unwrap();
        let second = service.add_request(SignRequest {
            request_hash: Some(Imprint::of(ksi_core::HashAlgorithm::Sha256, b"def")),
            request_level: None,
            request_config: false,
        });
        assert!(matches!(second, Err(AsyncError::CacheFull)));
    }

    #[test]
    fn cache_size_cannot_be_decreased() {
        let mut options = AsyncOptions::default().with_cache_size(4).unwrap();
        assert!(options.set_cache_size(2).is_err());
        assert_eq!(options.cache_size(), 4);
    }

    /// spec.md §8 scenario 3: 20 distinct inputs, cache size 20, max
    /// in-flight 8 — after draining, all 20 come back `ResponseReceived`
    /// and each one's first aggregation chain input is the hash that was
    /// submitted for it.
    #[tokio::test]
    async fn pipeline_drains_twenty_distinct_requests() {
        let transport = Arc::new(MockTransport {
            calls: AtomicUsize::new(0),
        });
        let options = AsyncOptions::default()
            .with_cache_size(20)
            .unwrap()
            .with_max_request_count(8);
        let service = AsyncService::new(transport, options);

        let mut expected = HashMap::new();
        for i in 0..20u32 {
            let hash = Imprint::of(ksi_core::HashAlgorithm::Sha256, format!("input-{i}").as_bytes());
            let id = service
                .add_request(SignRequest {
                    request_hash: Some(hash.clone()),
                    request_level: None,
                    request_config: false,
                })
                .unwrap();
            expected.insert(id, hash);
        }
        assert_eq!(service.pending_count(), 20);

        let mut received = Vec::new();
        for _ in 0..200 {
            if received.len() == expected.len() {
                break;
            }
            let outcome = service.run().await.unwrap();
            if let Some(handle) = outcome.terminal {
                received.push(handle);
            }
        }

        assert_eq!(received.len(), 20, "all 20 handles should have drained");
        assert_eq!(service.pending_count(), 0);
        for handle in received {
            assert_eq!(handle.state(), HandleState::ResponseReceived);
            let expected_hash = &expected[&handle.request_id()];
            let signature = handle.response().expect("response-received handle carries a signature");
            let actual_hash = &signature.aggregation_chains[0].input_hash;
            assert_eq!(actual_hash, expected_hash);
        }
    }

    /// Always answers with a bare, request-id-less push config, regardless
    /// of what was asked for — stands in for an aggregator that pushes its
    /// configuration unprompted (spec.md §4.6 "Receiving").
    struct ConfigPushTransport;

    #[async_trait]
    impl Transport for ConfigPushTransport {
        async fn send_sign_request(&self, _body: &[u8]) -> ksi_net::error::Result<RequestHandle> {
            use ksi_core::tags::aggregation;
            use ksi_core::Tlv;

            let response = Tlv::encode_children(
                aggregation::RESPONSE,
                &[Tlv::encode_children(
                    aggregation::CONFIG,
                    &[Tlv::encode_uint(aggregation::CONFIG_MAX_LEVEL, 4).unwrap()],
                )
                .unwrap()],
            )
            .unwrap();
            let pdu = Tlv::encode_children(aggregation::PDU, &[response]).unwrap();

            let mut handle = RequestHandle::new(RequestKind::Sign, Vec::new());
            handle.set_response_bytes(pdu.to_bytes().unwrap());
            Ok(handle)
        }

        async fn send_extend_request(&self, _body: &[u8]) -> ksi_net::error::Result<RequestHandle> {
            unimplemented!()
        }

        async fn send_publications_request(&self) -> ksi_net::error::Result<RequestHandle> {
            unimplemented!()
        }
    }

    /// spec.md §4.6 "Receiving" / §9's resolved Open Question: a
    /// request-id-less push config is routed to whichever handle first
    /// asked for one.
    #[tokio::test]
    async fn push_config_is_routed_to_first_config_requester() {
        let service = AsyncService::new(Arc::new(ConfigPushTransport), AsyncOptions::default());
        let id = service
            .add_request(SignRequest {
                request_hash: None,
                request_level: None,
                request_config: true,
            })
            .unwrap();

        let outcome = service.run().await.unwrap();
        let terminal = outcome.terminal.expect("expected the config-requesting handle to terminate");
        assert_eq!(terminal.request_id(), id);
        assert_eq!(terminal.state(), HandleState::PushConfigReceived);
        assert_eq!(terminal.push_config().and_then(|c| c.max_level), Some(4));
    }

    /// When nobody asked for a configuration, a pushed one is queued
    /// globally and handed out by the next `poll_push_config` call — the
    /// in-flight request whose round trip carried it is left waiting for
    /// its own answer, since the config was never addressed to it.
    #[tokio::test]
    async fn unclaimed_push_config_is_queued_globally() {
        let service = AsyncService::new(Arc::new(ConfigPushTransport), AsyncOptions::default());
        service
            .add_request(SignRequest {
                request_hash: Some(Imprint::of(ksi_core::HashAlgorithm::Sha256, b"abc")),
                request_level: None,
                request_config: false,
            })
            .unwrap();

        let outcome = service.run().await.unwrap();
        assert!(outcome.terminal.is_none());
        assert_eq!(outcome.pending, 1);

        let config = service.poll_push_config().expect("config should have been queued globally");
        assert_eq!(config.max_level, Some(4));
    }
}
