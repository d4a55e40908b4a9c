//! Client library for a Keyless Signature Infrastructure: sign a document
//! hash through an aggregator, extend a signature's calendar chain through
//! an extender, and verify a signature against a configurable policy
//! (spec.md's Context, C1-C7 re-exported from their owning crates).

pub mod context;
pub mod error;

pub use context::{Context, ContextBuilder, PublicationsFileTrustPolicy};
pub use error::{ContextError, Diagnostic, DiagnosticRing, Result};

pub use ksi_async::{AsyncError, AsyncHandle, AsyncOptions, AsyncService, ErrorCode, HandleState, PushConfig, RunOutcome, SignRequest};
pub use ksi_core::{HashAlgorithm, Imprint, Tlv};
pub use ksi_net::pdu::PduVersion;
pub use ksi_net::{transport_for_uri, Transport};
pub use ksi_proto::pki::{CertificateInfo, StaticTrustStore, TrustStore, X509TrustStore};
pub use ksi_proto::pubfile::{pubstring, PublicationsFile};
pub use ksi_proto::signature::{
    AggregationChain, AggregationLink, Attestation, CalendarAuthRecord, CalendarChain,
    CalendarLink, LinkDirection, PublicationRecord, Signature,
};
pub use ksi_verify::{Policy, PolicyOutcome, PolicyResult, Rule, RuleOutcome, VerError, VerificationContext};
pub use ksi_verify::policies;
