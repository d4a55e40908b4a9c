//! Network abstraction, URI handling, and wire PDU framing for the KSI
//! client (spec.md C5, §4.5, §6).

pub mod error;
pub mod pdu;
pub mod transport;
pub mod uri;

pub use error::{Result, TransportError};
pub use transport::{transport_for_uri, HandleContext, RequestHandle, RequestKind, Transport};
pub use uri::{uri_compose, uri_split, ResolvedScheme, UriParts};
