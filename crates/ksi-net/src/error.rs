use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tlv codec error: {0}")]
    Tlv(#[from] ksi_core::Error),

    #[error("http transport error: {0}")]
    Http(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("malformed URI: {0}")]
    BadUri(String),

    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}
