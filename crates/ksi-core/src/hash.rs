//! Hash algorithm registry and imprints.

use crate::error::{Error, Result};
use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

/// A registered KSI hash algorithm.
///
/// Variants carry the wire id used as the leading byte of an imprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Ripemd160,
    Sha384,
    Sha512,
}

/// Static description of one entry in the algorithm registry.
#[derive(Clone, Copy, Debug)]
pub struct AlgorithmInfo {
    pub id: u8,
    pub name: &'static str,
    pub digest_len: usize,
    /// Whether the algorithm is still considered cryptographically trusted
    /// for new signatures. Legacy algorithms (SHA-1) stay decodable but are
    /// not trusted.
    pub trusted: bool,
}

impl HashAlgorithm {
    pub fn id(self) -> u8 {
        self.info().id
    }

    pub fn digest_len(self) -> usize {
        self.info().digest_len
    }

    pub fn is_trusted(self) -> bool {
        self.info().trusted
    }

    pub fn info(self) -> AlgorithmInfo {
        match self {
            HashAlgorithm::Sha1 => AlgorithmInfo {
                id: 0x00,
                name: "SHA-1",
                digest_len: 20,
                trusted: false,
            },
            HashAlgorithm::Sha256 => AlgorithmInfo {
                id: 0x01,
                name: "SHA-256",
                digest_len: 32,
                trusted: true,
            },
            HashAlgorithm::Ripemd160 => AlgorithmInfo {
                id: 0x02,
                name: "RIPEMD-160",
                digest_len: 20,
                trusted: false,
            },
            HashAlgorithm::Sha384 => AlgorithmInfo {
                id: 0x04,
                name: "SHA-384",
                digest_len: 48,
                trusted: true,
            },
            HashAlgorithm::Sha512 => AlgorithmInfo {
                id: 0x05,
                name: "SHA-512",
                digest_len: 64,
                trusted: true,
            },
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            0x00 => HashAlgorithm::Sha1,
            0x01 => HashAlgorithm::Sha256,
            0x02 => HashAlgorithm::Ripemd160,
            0x04 => HashAlgorithm::Sha384,
            0x05 => HashAlgorithm::Sha512,
            other => return Err(Error::UnknownHashAlgorithm(other)),
        })
    }

    /// The full registry, in wire-id order.
    pub fn registry() -> &'static [HashAlgorithm] {
        &[
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Ripemd160,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ]
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Ripemd160 => Ripemd160::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// An algorithm id plus digest bytes, as carried on the wire.
#[derive(Clone, Debug, Eq)]
pub struct Imprint {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl Imprint {
    /// Hash `data` with `algorithm` and wrap the result.
    pub fn of(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let digest = algorithm.digest(data);
        Self { algorithm, digest }
    }

    /// Wrap an already-computed digest, validating its length against the
    /// algorithm's registry entry.
    pub fn from_digest(algorithm: HashAlgorithm, digest: Vec<u8>) -> Result<Self> {
        let expected = algorithm.digest_len();
        if digest.len() != expected {
            return Err(Error::WrongImprintLength {
                expected,
                actual: digest.len(),
            });
        }
        Ok(Self { algorithm, digest })
    }

    /// Parse `alg_byte || digest` as it appears on the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&alg_byte, digest) = bytes
            .split_first()
            .ok_or(Error::WrongImprintLength { expected: 1, actual: 0 })?;
        let algorithm = HashAlgorithm::from_id(alg_byte)?;
        Self::from_digest(algorithm, digest.to_vec())
    }

    /// An all-zero imprint for `algorithm`, used as the input hash of an
    /// aggregation chain whose leaf is contributed externally.
    pub fn zero(algorithm: HashAlgorithm) -> Self {
        Self {
            digest: vec![0u8; algorithm.digest_len()],
            algorithm,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// `alg_byte || digest`, as written to the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.digest.len());
        out.push(self.algorithm.id());
        out.extend_from_slice(&self.digest);
        out
    }

    /// Constant-time equality, for contexts comparing attacker-influenced
    /// imprints (e.g. request/response hash confirmation).
    pub fn ct_eq(&self, other: &Imprint) -> bool {
        self.algorithm == other.algorithm && bool::from(self.digest.ct_eq(&other.digest))
    }

    /// `algorithm || digest` concatenated with `other`, hashed under
    /// `algorithm` — the building block for chain-link application.
    pub fn hash_with(&self, algorithm: HashAlgorithm, parts: &[&[u8]]) -> Imprint {
        let mut buf = Vec::new();
        for p in parts {
            buf.extend_from_slice(p);
        }
        Imprint::of(algorithm, &buf)
    }
}

impl PartialEq for Imprint {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.digest == other.digest
    }
}

impl std::fmt::Display for Imprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.info().name, hex_encode(&self.digest))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_abc_matches_known_vector() {
        let imprint = Imprint::of(HashAlgorithm::Sha256, b"abc");
        assert_eq!(
            hex_encode(imprint.digest()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn round_trips_through_wire_bytes() {
        let imprint = Imprint::of(HashAlgorithm::Sha256, b"round trip me");
        let bytes = imprint.to_bytes();
        let parsed = Imprint::from_bytes(&bytes).unwrap();
        assert_eq!(imprint, parsed);
    }

    #[test]
    fn rejects_wrong_digest_length() {
        let err = Imprint::from_digest(HashAlgorithm::Sha256, vec![0u8; 10]);
        assert!(err.is_err());
    }

    #[test]
    fn sha1_is_registered_but_untrusted() {
        assert!(!HashAlgorithm::Sha1.is_trusted());
        assert!(HashAlgorithm::Sha256.is_trusted());
    }
}
