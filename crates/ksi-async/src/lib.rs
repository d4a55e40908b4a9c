//! Asynchronous, pipelined signing (spec.md C6, §4.6): submit up to
//! `cache_size` requests and drive them cooperatively with [`AsyncService::run`].

pub mod error;
pub mod handle;
pub mod service;

pub use error::{AsyncError, Result};
pub use handle::{AsyncHandle, ErrorCode, HandleState, SignRequest};
pub use service::{AsyncOptions, AsyncService, PushConfig, RunOutcome};
