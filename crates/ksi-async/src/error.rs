use thiserror::Error;

pub type Result<T> = std::result::Result<T, AsyncError>;

#[derive(Debug, Error)]
pub enum AsyncError {
    #[error("async request cache is full")]
    CacheFull,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("service has no endpoint configured")]
    InvalidState,

    #[error("request timed out waiting for a response")]
    NetworkTimeout,

    #[error("transport error: {0}")]
    Transport(#[from] ksi_net::TransportError),

    #[error("tlv codec error: {0}")]
    Tlv(#[from] ksi_core::Error),
}
