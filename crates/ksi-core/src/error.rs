use thiserror::Error;

/// Result alias used throughout `ksi-core`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("truncated TLV stream: expected {expected} more byte(s)")]
    Truncated { expected: usize },

    #[error("TLV tag {0:#x} exceeds 13-bit range")]
    TagOutOfRange(u16),

    #[error("TLV length {0} exceeds long-form limit")]
    LengthOutOfRange(usize),

    #[error("unknown or unsupported hash algorithm id {0:#x}")]
    UnknownHashAlgorithm(u8),

    #[error("imprint has wrong digest length: expected {expected}, got {actual}")]
    WrongImprintLength { expected: usize, actual: usize },

    #[error("mandatory TLV element {tag:#x} missing from {context}")]
    MissingElement { tag: u16, context: &'static str },

    #[error("unknown critical TLV element {tag:#x} in {context}")]
    UnknownCriticalElement { tag: u16, context: &'static str },

    #[error("TLV element {tag:#x} repeated but template forbids it")]
    UnexpectedRepetition { tag: u16 },

    #[error("TLV element {tag:#x} has the wrong payload kind for {context}")]
    WrongElementKind { tag: u16, context: &'static str },

    #[error("integer payload is not minimally encoded (leading zero byte)")]
    NonCanonicalInteger,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
