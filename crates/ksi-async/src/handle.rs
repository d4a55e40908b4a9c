//! Per-request handle and its state machine (spec.md §3 "Async handle",
//! §4.6 "Per-handle state machine").

use ksi_net::pdu::{PduVersion, PushConfig};
use ksi_proto::signature::Signature;
use std::time::Instant;

/// Mirrors the diagram in spec.md §4.6. `Error` and `ResponseReceived`/
/// `PushConfigReceived` are terminal: [`AsyncHandle::transition`] panics in
/// debug builds if asked to leave a terminal state, backing the "terminal
/// monotonicity" property in spec.md §8.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    WaitingNew,
    WaitingForDispatch,
    WaitingForResponse,
    ResponseReceived,
    PushConfigReceived,
    Error,
}

impl HandleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandleState::ResponseReceived | HandleState::PushConfigReceived | HandleState::Error
        )
    }
}

/// A signing request submitted through [`crate::AsyncService::add_request`].
/// `request_hash` may be absent for a request that only asks the
/// aggregator to push its configuration (spec.md §4.6 "Admission": "an
/// empty request (no hash, no config) is rejected").
#[derive(Clone, Debug)]
pub struct SignRequest {
    pub request_hash: Option<ksi_core::Imprint>,
    pub request_level: Option<u8>,
    pub request_config: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    InvalidState,
    CacheFull,
    NetworkTimeout,
    ServerError(u64),
}

/// Owns everything spec.md §3 lists for the async handle: the request, an
/// optional response, the service-assigned id, timestamps, state, and
/// error detail.
pub struct AsyncHandle {
    pub(crate) request_id: u64,
    pub(crate) request: SignRequest,
    pub(crate) response: Option<Signature>,
    pub(crate) push_config: Option<PushConfig>,
    pub(crate) created_at: Instant,
    pub(crate) state_changed_at: Instant,
    pub(crate) state: HandleState,
    pub(crate) error_code: Option<ErrorCode>,
    pub(crate) error_message: Option<String>,
    pub(crate) pdu_version: PduVersion,
}

impl AsyncHandle {
    pub(crate) fn new(request_id: u64, request: SignRequest, pdu_version: PduVersion) -> Self {
        let now = Instant::now();
        Self {
            request_id,
            request,
            response: None,
            push_config: None,
            created_at: now,
            state_changed_at: now,
            state: HandleState::WaitingNew,
            error_code: None,
            error_message: None,
            pdu_version,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn response(&self) -> Option<&Signature> {
        self.response.as_ref()
    }

    pub fn into_response(self) -> Option<Signature> {
        self.response
    }

    /// The server's pushed configuration, present once the handle reaches
    /// `PushConfigReceived` (spec.md §4.6 "Receiving").
    pub fn push_config(&self) -> Option<&PushConfig> {
        self.push_config.as_ref()
    }

    pub fn error(&self) -> Option<(ErrorCode, Option<&str>)> {
        self.error_code.map(|c| (c, self.error_message.as_deref()))
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn state_changed_at(&self) -> Instant {
        self.state_changed_at
    }

    pub(crate) fn transition(&mut self, next: HandleState) {
        debug_assert!(
            !self.state.is_terminal(),
            "attempted to transition a terminal handle (id {}) from {:?} to {:?}",
            self.request_id,
            self.state,
            next
        );
        self.state = next;
        self.state_changed_at = Instant::now();
    }

    pub(crate) fn fail(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.error_code = Some(code);
        self.error_message = Some(message.into());
        self.transition(HandleState::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn transitioning_a_terminal_handle_panics_in_debug() {
        let mut handle = AsyncHandle::new(
            1,
            SignRequest {
                request_hash: Some(ksi_core::Imprint::zero(ksi_core::HashAlgorithm::Sha256)),
                request_level: None,
                request_config: false,
            },
            PduVersion::V1,
        );
        handle.transition(HandleState::ResponseReceived);
        handle.transition(HandleState::WaitingForResponse);
    }
}
