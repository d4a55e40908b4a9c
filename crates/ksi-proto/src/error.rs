use ksi_core::Imprint;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("TLV codec error: {0}")]
    Tlv(#[from] ksi_core::Error),

    #[error("signature carries neither a calendar auth record nor a publication record")]
    MissingAttestation,

    #[error("aggregation chain has no links")]
    EmptyAggregationChain,

    #[error("aggregation chains do not form a continuous hash path: {computed} != {next_input}")]
    DiscontinuousChain { computed: Imprint, next_input: Imprint },

    #[error("calendar chain right links exceed the time budget encoded by the publication time")]
    CalendarTimeOverflow,

    #[error("publications file signature covers {signed_len} bytes but file is {actual_len} bytes")]
    TruncatedSignedRegion { signed_len: usize, actual_len: usize },

    #[error("publication string has an invalid CRC-32 trailer")]
    BadPublicationStringCrc,

    #[error("publication string is too short to contain a time and imprint")]
    ShortPublicationString,

    #[error("base-32 decoding failed: {0}")]
    Base32(String),

    #[error("X.509 certificate could not be parsed: {0}")]
    CertParse(String),

    #[error("PKI signature verification failed")]
    PkiSignatureInvalid,

    #[error("no publication found at or after the requested time")]
    PublicationNotFound,
}
