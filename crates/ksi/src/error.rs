//! `Context`'s own error type plus the bounded diagnostic ring buffer
//! spec.md §7 describes: the Rust rendition of `libksi`'s `KSI_ERR` stack
//! and `KSI_BEGIN`/`KSI_FAIL` macros. Callers still match on the `Result`
//! returned to them; the ring buffer is an orthogonal, best-effort
//! diagnostic trail for the last N failures, independent of any single
//! call's return value.

use std::collections::VecDeque;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("no aggregator endpoint configured")]
    NoAggregator,
    #[error("no extender endpoint configured")]
    NoExtender,
    #[error("no publications URL configured")]
    NoPublicationsUrl,
    #[error("transport error: {0}")]
    Transport(#[from] ksi_net::TransportError),
    #[error("protocol/data-model error: {0}")]
    Proto(#[from] ksi_proto::Error),
    #[error("tlv codec error: {0}")]
    Tlv(#[from] ksi_core::Error),
    #[error("async pipeline error: {0}")]
    Async(#[from] ksi_async::AsyncError),
    #[error("the aggregator returned no signature for request {request_id}: {detail}")]
    NoSignature { request_id: u64, detail: String },
    #[error("the extender returned no calendar chain: {0}")]
    NoCalendarChain(String),
    #[error("publications file signer is not trusted by the configured trust policy")]
    UntrustedPublicationsFile,
}

/// One entry in the diagnostic ring buffer (spec.md §7): the source
/// location and message of a past failure, kept independent of whatever
/// `Result` the call that caused it returned.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub file: &'static str,
    pub line: u32,
    pub message: String,
}

/// Bounded FIFO of the last `capacity` diagnostics (spec.md §7, default
/// `N = 16`). Freeing a handle, per spec.md §4.6/§7, does not clear this —
/// it is process/context-scoped, not per-call.
pub struct DiagnosticRing {
    capacity: usize,
    entries: VecDeque<Diagnostic>,
}

impl DiagnosticRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, file: &'static str, line: u32, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Diagnostic {
            file,
            line,
            message: message.into(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }
}

impl Default for DiagnosticRing {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Record `err` (with the call site) into `ring` and return it, so fallible
/// `Context` methods can both propagate the error and leave a diagnostic
/// trail in one expression.
macro_rules! record {
    ($ring:expr, $err:expr) => {{
        let err = $err;
        $ring.push(file!(), line!(), err.to_string());
        err
    }};
}

pub(crate) use record;
