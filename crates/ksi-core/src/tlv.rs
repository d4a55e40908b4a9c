//! Binary TLV framing: the short-form/long-form header and a parsed node
//! tree built on top of it.
//!
//! Header layout, most significant bit first:
//!
//! ```text
//! short form (2-byte header): L N F t t t t t | llllllll
//! long  form (4-byte header): L N F t t t t t | tttttttt | llllllll | llllllll
//! ```
//!
//! `L` selects long form. `N` marks the element non-critical (an unknown
//! non-critical element may be skipped; an unknown critical one is a parse
//! error). `F` marks the element "forward" (preserved verbatim by
//! intermediate processors even if otherwise unrecognized). The short form
//! carries a 5-bit tag and an 8-bit length; the long form carries a 13-bit
//! tag and a 16-bit length.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Read;
use tokio_util::codec::{Decoder, Encoder};

const FLAG_LONG_FORM: u8 = 0x80;
const FLAG_NON_CRITICAL: u8 = 0x40;
const FLAG_FORWARD: u8 = 0x20;
const SHORT_TAG_MASK: u8 = 0x1f;
const MAX_SHORT_TAG: u16 = 0x1f;
const MAX_LONG_TAG: u16 = 0x1fff;
const MAX_SHORT_LEN: usize = 0xff;
const MAX_LONG_LEN: usize = 0xffff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlvHeader {
    pub tag: u16,
    pub non_critical: bool,
    pub forward: bool,
}

impl TlvHeader {
    pub fn new(tag: u16) -> Result<Self> {
        if tag > MAX_LONG_TAG {
            return Err(Error::TagOutOfRange(tag));
        }
        Ok(Self {
            tag,
            non_critical: false,
            forward: false,
        })
    }

    pub fn non_critical(mut self, value: bool) -> Self {
        self.non_critical = value;
        self
    }

    pub fn forward(mut self, value: bool) -> Self {
        self.forward = value;
        self
    }

    fn requires_long_form(&self, payload_len: usize) -> bool {
        self.tag > MAX_SHORT_TAG || payload_len > MAX_SHORT_LEN
    }

    fn flags(&self, long_form: bool) -> u8 {
        let mut b = 0u8;
        if long_form {
            b |= FLAG_LONG_FORM;
        }
        if self.non_critical {
            b |= FLAG_NON_CRITICAL;
        }
        if self.forward {
            b |= FLAG_FORWARD;
        }
        b
    }
}

/// A single parsed TLV node. The payload is kept as raw bytes until a caller
/// casts it via [`Tlv::as_uint`], [`Tlv::as_children`], etc. — parsing a
/// nested structure does not recursively decode everything up front.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tlv {
    pub header: TlvHeader,
    payload: Vec<u8>,
}

impl Tlv {
    pub fn new(header: TlvHeader, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_LONG_LEN {
            return Err(Error::LengthOutOfRange(payload.len()));
        }
        Ok(Self { header, payload })
    }

    pub fn raw(tag: u16, payload: Vec<u8>) -> Result<Self> {
        Self::new(TlvHeader::new(tag)?, payload)
    }

    pub fn tag(&self) -> u16 {
        self.header.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Cast the payload as a big-endian, minimum-length-encoded unsigned
    /// integer (the `INTEGER` template element kind).
    pub fn as_uint(&self) -> Result<u64> {
        if self.payload.len() > 8 {
            return Err(Error::WrongElementKind {
                tag: self.tag(),
                context: "uint",
            });
        }
        if self.payload.first() == Some(&0) {
            // Canonical encoding forbids leading zero bytes; only the
            // zero-length payload is allowed to represent zero.
            return Err(Error::NonCanonicalInteger);
        }
        if self.payload.is_empty() {
            return Ok(0);
        }
        let mut buf = [0u8; 8];
        buf[8 - self.payload.len()..].copy_from_slice(&self.payload);
        Ok(u64::from_be_bytes(buf))
    }

    /// Cast the payload as a null-terminated UTF-8 string (the
    /// `UTF8_STRING` template element kind).
    pub fn as_utf8_string(&self) -> Result<String> {
        let bytes = match self.payload.split_last() {
            Some((0, rest)) => rest,
            _ => &self.payload[..],
        };
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::WrongElementKind {
            tag: self.tag(),
            context: "utf8 string",
        })
    }

    /// Cast the payload as a nested TLV sequence (the `COMPOSITE` template
    /// element kind).
    pub fn as_children(&self) -> Result<Vec<Tlv>> {
        parse_all(&self.payload)
    }

    /// Encode `tag` as a minimum-length big-endian integer payload.
    pub fn encode_uint(tag: u16, value: u64) -> Result<Self> {
        if value == 0 {
            return Self::raw(tag, Vec::new());
        }
        let be = value.to_be_bytes();
        let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(7);
        Self::raw(tag, be[first_nonzero..].to_vec())
    }

    /// Encode `tag` as a null-terminated UTF-8 string payload.
    pub fn encode_utf8_string(tag: u16, value: &str) -> Result<Self> {
        let mut payload = value.as_bytes().to_vec();
        payload.push(0);
        Self::raw(tag, payload)
    }

    /// Encode `tag` wrapping nested elements (the `COMPOSITE` kind).
    pub fn encode_children(tag: u16, children: &[Tlv]) -> Result<Self> {
        let mut payload = Vec::new();
        for child in children {
            child.write_to(&mut payload)?;
        }
        Self::raw(tag, payload)
    }

    fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        let long_form = self.header.requires_long_form(self.payload.len());
        if !long_form {
            out.push(self.header.flags(false) | (self.header.tag as u8 & SHORT_TAG_MASK));
            out.push(self.payload.len() as u8);
        } else {
            if self.payload.len() > MAX_LONG_LEN {
                return Err(Error::LengthOutOfRange(self.payload.len()));
            }
            let tag_hi = (self.header.tag >> 8) as u8 & 0x1f;
            let tag_lo = (self.header.tag & 0xff) as u8;
            out.push(self.header.flags(true) | tag_hi);
            out.push(tag_lo);
            out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        }
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// Parse every top-level TLV in `bytes`, failing if trailing bytes don't
/// form a complete element.
pub fn parse_all(bytes: &[u8]) -> Result<Vec<Tlv>> {
    let mut out = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (tlv, consumed) = parse_one(rest)?;
        out.push(tlv);
        rest = &rest[consumed..];
    }
    Ok(out)
}

fn parse_one(bytes: &[u8]) -> Result<(Tlv, usize)> {
    let first = *bytes.first().ok_or(Error::Truncated { expected: 1 })?;
    let long_form = first & FLAG_LONG_FORM != 0;
    let non_critical = first & FLAG_NON_CRITICAL != 0;
    let forward = first & FLAG_FORWARD != 0;

    if !long_form {
        if bytes.len() < 2 {
            return Err(Error::Truncated {
                expected: 2 - bytes.len(),
            });
        }
        let tag = (first & SHORT_TAG_MASK) as u16;
        let len = bytes[1] as usize;
        let header_len = 2;
        if bytes.len() < header_len + len {
            return Err(Error::Truncated {
                expected: header_len + len - bytes.len(),
            });
        }
        let payload = bytes[header_len..header_len + len].to_vec();
        let header = TlvHeader {
            tag,
            non_critical,
            forward,
        };
        Ok((Tlv { header, payload }, header_len + len))
    } else {
        if bytes.len() < 4 {
            return Err(Error::Truncated {
                expected: 4 - bytes.len(),
            });
        }
        let tag = (((first & 0x1f) as u16) << 8) | bytes[1] as u16;
        let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let header_len = 4;
        if bytes.len() < header_len + len {
            return Err(Error::Truncated {
                expected: header_len + len - bytes.len(),
            });
        }
        let payload = bytes[header_len..header_len + len].to_vec();
        let header = TlvHeader {
            tag,
            non_critical,
            forward,
        };
        Ok((Tlv { header, payload }, header_len + len))
    }
}

/// Read every top-level TLV from a blocking reader (publications files,
/// signature blobs read off disk).
pub fn read_all<R: Read>(mut reader: R) -> Result<Vec<Tlv>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    parse_all(&buf)
}

/// `tokio_util::codec` framing over a byte stream carrying a sequence of
/// top-level TLVs (used by the TCP transport).
#[derive(Default)]
pub struct TlvCodec;

impl Decoder for TlvCodec {
    type Item = Tlv;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Tlv>> {
        if src.is_empty() {
            return Ok(None);
        }
        match parse_one(src) {
            Ok((tlv, consumed)) => {
                src.advance(consumed);
                Ok(Some(tlv))
            }
            Err(Error::Truncated { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Encoder<Tlv> for TlvCodec {
    type Error = Error;

    fn encode(&mut self, item: Tlv, dst: &mut BytesMut) -> Result<()> {
        let bytes = item.to_bytes()?;
        dst.put_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_round_trips() {
        let tlv = Tlv::encode_uint(0x02, 42).unwrap();
        let bytes = tlv.to_bytes().unwrap();
        assert_eq!(bytes.len(), 2 + 1);
        let parsed = parse_all(&bytes).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].as_uint().unwrap(), 42);
    }

    #[test]
    fn long_form_used_for_large_tag_or_length() {
        let payload = vec![0u8; 300];
        let tlv = Tlv::raw(0x0201, payload.clone()).unwrap();
        let bytes = tlv.to_bytes().unwrap();
        assert_eq!(bytes[0] & FLAG_LONG_FORM, FLAG_LONG_FORM);
        let parsed = parse_all(&bytes).unwrap();
        assert_eq!(parsed[0].payload(), &payload[..]);
    }

    #[test]
    fn nested_composite_round_trips() {
        let inner = Tlv::encode_uint(0x02, 7).unwrap();
        let outer = Tlv::encode_children(0x0201, &[inner]).unwrap();
        let bytes = outer.to_bytes().unwrap();
        let parsed = parse_all(&bytes).unwrap();
        let children = parsed[0].as_children().unwrap();
        assert_eq!(children[0].as_uint().unwrap(), 7);
    }

    #[test]
    fn truncated_input_reports_missing_bytes() {
        let tlv = Tlv::encode_uint(0x02, 42).unwrap();
        let mut bytes = tlv.to_bytes().unwrap();
        bytes.pop();
        let err = parse_all(&bytes).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn tag_over_13_bits_is_rejected() {
        let err = TlvHeader::new(0x2000).unwrap_err();
        assert!(matches!(err, Error::TagOutOfRange(_)));
    }

    #[test]
    fn zero_value_encodes_as_empty_payload() {
        let tlv = Tlv::encode_uint(0x02, 0).unwrap();
        assert!(tlv.payload().is_empty());
        assert_eq!(tlv.as_uint().unwrap(), 0);
    }

    #[test]
    fn leading_zero_byte_is_rejected_as_non_canonical() {
        let tlv = Tlv::raw(0x02, vec![0x00, 0x01]).unwrap();
        assert!(matches!(tlv.as_uint(), Err(Error::NonCanonicalInteger)));
    }

    #[test]
    fn utf8_string_round_trips_through_null_terminator() {
        let tlv = Tlv::encode_utf8_string(0x03, "hello").unwrap();
        let bytes = tlv.to_bytes().unwrap();
        let parsed = parse_all(&bytes).unwrap();
        assert_eq!(parsed[0].as_utf8_string().unwrap(), "hello");
    }
}
