//! TLV wire codec and hash/imprint primitives shared by every other `ksi-*`
//! crate.

pub mod error;
pub mod hash;
pub mod tags;
pub mod template;
pub mod tlv;

pub use error::{Error, Result};
pub use hash::{HashAlgorithm, Imprint};
pub use tlv::{Tlv, TlvCodec, TlvHeader};
