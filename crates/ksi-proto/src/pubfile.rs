//! Publications file: the periodically-published, PKI-signed list of
//! calendar roots used to verify signatures offline, and the human-typeable
//! "publication string" encoding of a single entry.

use crate::error::{Error, Result};
use crate::pki::{self, CertificateInfo, PkiSignature, TrustStore};
use crate::signature::PublicationRecord;
use ksi_core::tags::pubfile as tags;
use ksi_core::tlv::{parse_all, Tlv};
use ksi_core::{HashAlgorithm, Imprint};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PubFileHeader {
    pub version: u32,
    pub creation_time: u64,
    pub repository_uri: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertRecord {
    pub cert_id: Vec<u8>,
    pub x509_der: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicationsFile {
    pub header: PubFileHeader,
    pub publications: Vec<PublicationRecord>,
    pub certificates: Vec<CertRecord>,
    /// Length, in bytes, of the signed prefix (magic + header + publication
    /// records + certificate records, excluding the trailing signature TLV).
    pub signed_bytes_len: usize,
    pub signature: PkiSignature,
}

impl PublicationsFile {
    /// Parse the `KSIPUBLF`-prefixed binary format.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let magic_len = tags::MAGIC.len();
        if bytes.len() < magic_len || &bytes[..magic_len] != tags::MAGIC {
            return Err(Error::ShortPublicationString);
        }
        let tlvs = parse_all(&bytes[magic_len..])?;

        let mut header = None;
        let mut publications = Vec::new();
        let mut certificates = Vec::new();
        let mut signature = None;
        let mut signed_bytes_len = magic_len;

        for tlv in &tlvs {
            let encoded_len = tlv.to_bytes()?.len();
            match tlv.tag() {
                tags::HEADER => {
                    header = Some(parse_header(tlv)?);
                    signed_bytes_len += encoded_len;
                }
                ksi_core::tags::PUBLICATION_RECORD => {
                    publications.push(parse_publication_record(tlv)?);
                    signed_bytes_len += encoded_len;
                }
                tags::CERT_RECORD => {
                    certificates.push(parse_cert_record(tlv)?);
                    signed_bytes_len += encoded_len;
                }
                tags::SIGNATURE => {
                    signature = Some(parse_pki_signature(tlv)?);
                }
                _ if tlv.header.non_critical => {}
                other => {
                    return Err(Error::Tlv(ksi_core::Error::UnknownCriticalElement {
                        tag: other,
                        context: "publications file",
                    }))
                }
            }
        }

        Ok(Self {
            header: header.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
                tag: tags::HEADER,
                context: "publications file",
            }))?,
            publications,
            certificates,
            signed_bytes_len,
            signature: signature.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
                tag: tags::SIGNATURE,
                context: "publications file",
            }))?,
        })
    }

    /// Verify the PKI signature over the signed prefix against `trust_store`.
    pub fn verify(&self, bytes: &[u8], trust_store: &dyn TrustStore) -> Result<CertificateInfo> {
        if bytes.len() < self.signed_bytes_len {
            return Err(Error::TruncatedSignedRegion {
                signed_len: self.signed_bytes_len,
                actual_len: bytes.len(),
            });
        }
        pki::verify(trust_store, &self.signature, &bytes[..self.signed_bytes_len])
    }

    pub fn find_publication_at_or_after(&self, time: u64) -> Option<&PublicationRecord> {
        self.publications
            .iter()
            .filter(|p| p.publication_time >= time)
            .min_by_key(|p| p.publication_time)
    }

    pub fn find_by_publication_string(&self, s: &str) -> Result<&PublicationRecord> {
        let (time, hash) = pubstring::decode(s)?;
        self.publications
            .iter()
            .find(|p| p.publication_time == time && p.publication_hash == hash)
            .ok_or(Error::PublicationNotFound)
    }
}

fn parse_header(tlv: &Tlv) -> Result<PubFileHeader> {
    let children = tlv.as_children()?;
    let mut version = None;
    let mut creation_time = None;
    let mut repository_uri = None;
    for child in children {
        match child.tag() {
            tags::HEADER_VERSION => version = Some(child.as_uint()? as u32),
            tags::HEADER_CREATION_TIME => creation_time = Some(child.as_uint()?),
            tags::HEADER_REPOSITORY_URI => repository_uri = Some(child.as_utf8_string()?),
            _ if child.header.non_critical => {}
            other => {
                return Err(Error::Tlv(ksi_core::Error::UnknownCriticalElement {
                    tag: other,
                    context: "publications file header",
                }))
            }
        }
    }
    Ok(PubFileHeader {
        version: version.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: tags::HEADER_VERSION,
            context: "publications file header",
        }))?,
        creation_time: creation_time.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: tags::HEADER_CREATION_TIME,
            context: "publications file header",
        }))?,
        repository_uri,
    })
}

fn parse_publication_record(tlv: &Tlv) -> Result<PublicationRecord> {
    let children = tlv.as_children()?;
    let mut publication_time = None;
    let mut publication_hash = None;
    let mut publication_refs = Vec::new();
    let mut repository_uris = Vec::new();
    for child in children {
        match child.tag() {
            0x02 => publication_time = Some(child.as_uint()?),
            0x04 => publication_hash = Some(Imprint::from_bytes(child.payload())?),
            0x09 => publication_refs.push(child.as_utf8_string()?),
            0x0a => repository_uris.push(child.as_utf8_string()?),
            _ if child.header.non_critical => {}
            other => {
                return Err(Error::Tlv(ksi_core::Error::UnknownCriticalElement {
                    tag: other,
                    context: "publication record",
                }))
            }
        }
    }
    Ok(PublicationRecord {
        publication_time: publication_time.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: 0x02,
            context: "publication record",
        }))?,
        publication_hash: publication_hash.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: 0x04,
            context: "publication record",
        }))?,
        publication_refs,
        repository_uris,
    })
}

fn parse_cert_record(tlv: &Tlv) -> Result<CertRecord> {
    let children = tlv.as_children()?;
    let mut cert_id = None;
    let mut x509_der = None;
    for child in children {
        match child.tag() {
            tags::CERT_RECORD_ID => cert_id = Some(child.payload().to_vec()),
            tags::CERT_RECORD_X509 => x509_der = Some(child.payload().to_vec()),
            _ if child.header.non_critical => {}
            other => {
                return Err(Error::Tlv(ksi_core::Error::UnknownCriticalElement {
                    tag: other,
                    context: "certificate record",
                }))
            }
        }
    }
    Ok(CertRecord {
        cert_id: cert_id.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: tags::CERT_RECORD_ID,
            context: "certificate record",
        }))?,
        x509_der: x509_der.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: tags::CERT_RECORD_X509,
            context: "certificate record",
        }))?,
    })
}

fn parse_pki_signature(tlv: &Tlv) -> Result<PkiSignature> {
    let children = tlv.as_children()?;
    let mut signer_cert = None;
    let mut signature_bytes = None;
    for child in children {
        match child.tag() {
            0x01 => signer_cert = Some(child.payload().to_vec()),
            0x02 => signature_bytes = Some(child.payload().to_vec()),
            _ if child.header.non_critical => {}
            other => {
                return Err(Error::Tlv(ksi_core::Error::UnknownCriticalElement {
                    tag: other,
                    context: "pki signature",
                }))
            }
        }
    }
    Ok(PkiSignature {
        signer_cert: signer_cert.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: 0x01,
            context: "pki signature",
        }))?,
        signature_bytes: signature_bytes.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: 0x02,
            context: "pki signature",
        }))?,
        signed_data_alg: HashAlgorithm::Sha256,
    })
}

/// Publication-string codec: base-32 (RFC 4648, no padding) over
/// `publication_time_be(8) || imprint || crc32(publication_time_be || imprint)`.
pub mod pubstring {
    use super::*;
    use data_encoding::BASE32_NOPAD;

    pub fn encode(time: u64, hash: &Imprint) -> String {
        let mut payload = Vec::with_capacity(8 + 1 + hash.digest().len() + 4);
        payload.extend_from_slice(&time.to_be_bytes());
        payload.extend_from_slice(&hash.to_bytes());
        let crc = crc32fast::hash(&payload);
        payload.extend_from_slice(&crc.to_be_bytes());
        BASE32_NOPAD.encode(&payload)
    }

    pub fn decode(s: &str) -> Result<(u64, Imprint)> {
        let bytes = BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|e| Error::Base32(e.to_string()))?;
        if bytes.len() < 8 + 1 + 4 {
            return Err(Error::ShortPublicationString);
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let expected_crc = u32::from_be_bytes(crc_bytes.try_into().unwrap());
        if crc32fast::hash(body) != expected_crc {
            return Err(Error::BadPublicationStringCrc);
        }
        let time = u64::from_be_bytes(body[..8].try_into().unwrap());
        let hash = Imprint::from_bytes(&body[8..])?;
        Ok((time, hash))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use ksi_core::HashAlgorithm;

        #[test]
        fn round_trips() {
            let hash = Imprint::of(HashAlgorithm::Sha256, b"publication root");
            let s = encode(1_398_866_256, &hash);
            let (time, decoded) = decode(&s).unwrap();
            assert_eq!(time, 1_398_866_256);
            assert_eq!(decoded, hash);
        }

        #[test]
        fn rejects_corrupted_crc() {
            let hash = Imprint::of(HashAlgorithm::Sha256, b"publication root");
            let mut s = encode(1_398_866_256, &hash);
            s.push('A');
            assert!(decode(&s).is_err());
        }
    }
}
