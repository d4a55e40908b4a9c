//! PKI trust interface used to check the signature over a calendar
//! authentication record or a publications file.
//!
//! The cryptographic primitives themselves are not this client's concern —
//! callers supply a [`TrustStore`] (or use [`X509TrustStore`]/
//! [`StaticTrustStore`]) that decides whether a certificate is trusted.

use crate::error::{Error, Result};
use ksi_core::HashAlgorithm;
use ring::signature::{self, UnparsedPublicKey};
use std::collections::HashSet;
use x509_parser::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PkiSignature {
    pub signer_cert: Vec<u8>,
    pub signature_bytes: Vec<u8>,
    pub signed_data_alg: HashAlgorithm,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject_email: Option<String>,
    pub sha256_fingerprint: [u8; 32],
}

pub trait TrustStore: Send + Sync {
    fn is_trusted(&self, cert_der: &[u8]) -> Result<CertificateInfo>;
}

/// Verify `sig` over `signed_data`, and additionally check the signer's
/// certificate against `trust_store`.
pub fn verify(trust_store: &dyn TrustStore, sig: &PkiSignature, signed_data: &[u8]) -> Result<CertificateInfo> {
    let info = trust_store.is_trusted(&sig.signer_cert)?;
    verify_signature_only(sig, signed_data)?;
    Ok(info)
}

fn verify_signature_only(sig: &PkiSignature, signed_data: &[u8]) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(&sig.signer_cert)
        .map_err(|e| Error::CertParse(e.to_string()))?;
    let public_key = cert.public_key().raw;

    let algorithm: &dyn signature::VerificationAlgorithm = match sig.signed_data_alg {
        HashAlgorithm::Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        HashAlgorithm::Sha384 => &signature::RSA_PKCS1_2048_8192_SHA384,
        HashAlgorithm::Sha512 => &signature::RSA_PKCS1_2048_8192_SHA512,
        _ => return Err(Error::PkiSignatureInvalid),
    };

    let verifying_key = UnparsedPublicKey::new(algorithm, public_key);
    verifying_key
        .verify(signed_data, &sig.signature_bytes)
        .map_err(|_| Error::PkiSignatureInvalid)
}

fn sha256_fingerprint(der: &[u8]) -> [u8; 32] {
    let digest = ring::digest::digest(&ring::digest::SHA256, der);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

fn subject_email(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_email()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

/// Trust store backed by real X.509 parsing: a certificate is trusted if its
/// subject email or SHA-256 fingerprint matches the configured policy.
pub struct X509TrustStore {
    pub trusted_emails: HashSet<String>,
    pub trusted_fingerprints: HashSet<[u8; 32]>,
}

impl X509TrustStore {
    pub fn new() -> Self {
        Self {
            trusted_emails: HashSet::new(),
            trusted_fingerprints: HashSet::new(),
        }
    }

    pub fn trust_email(mut self, email: impl Into<String>) -> Self {
        self.trusted_emails.insert(email.into());
        self
    }

    pub fn trust_fingerprint(mut self, fingerprint: [u8; 32]) -> Self {
        self.trusted_fingerprints.insert(fingerprint);
        self
    }
}

impl Default for X509TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustStore for X509TrustStore {
    fn is_trusted(&self, cert_der: &[u8]) -> Result<CertificateInfo> {
        let (_, cert) =
            X509Certificate::from_der(cert_der).map_err(|e| Error::CertParse(e.to_string()))?;
        let fingerprint = sha256_fingerprint(cert_der);
        let email = subject_email(&cert);

        let trusted = self.trusted_fingerprints.contains(&fingerprint)
            || email
                .as_deref()
                .map(|e| self.trusted_emails.contains(e))
                .unwrap_or(false);

        if !trusted {
            return Err(Error::PkiSignatureInvalid);
        }

        Ok(CertificateInfo {
            subject_email: email,
            sha256_fingerprint: fingerprint,
        })
    }
}

/// In-memory trust store used by tests and by embedders who want a fixed
/// trust anchor without pulling in ASN.1 parsing.
pub struct StaticTrustStore {
    pub trusted_fingerprints: HashSet<[u8; 32]>,
}

impl StaticTrustStore {
    pub fn with_fingerprint(fingerprint: [u8; 32]) -> Self {
        let mut trusted_fingerprints = HashSet::new();
        trusted_fingerprints.insert(fingerprint);
        Self { trusted_fingerprints }
    }
}

impl TrustStore for StaticTrustStore {
    fn is_trusted(&self, cert_der: &[u8]) -> Result<CertificateInfo> {
        let fingerprint = sha256_fingerprint(cert_der);
        if !self.trusted_fingerprints.contains(&fingerprint) {
            return Err(Error::PkiSignatureInvalid);
        }
        Ok(CertificateInfo {
            subject_email: None,
            sha256_fingerprint: fingerprint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_store_rejects_unknown_fingerprint() {
        let store = StaticTrustStore::with_fingerprint([0u8; 32]);
        let err = store.is_trusted(b"not a real cert").unwrap_err();
        assert!(matches!(err, Error::PkiSignatureInvalid));
    }
}
