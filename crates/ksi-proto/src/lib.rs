//! Signature, publications-file and PKI data model built on top of
//! `ksi-core`'s TLV codec.

pub mod error;
pub mod pki;
pub mod pubfile;
pub mod signature;

pub use error::{Error, Result};
pub use pki::{CertificateInfo, PkiSignature, TrustStore};
pub use pubfile::PublicationsFile;
pub use signature::{
    AggregationChain, AggregationLink, Attestation, CalendarAuthRecord, CalendarChain,
    CalendarLink, LinkDirection, LinkMetadata, PublicationRecord, Rfc3161Record, Signature,
};
