use p256::ecdsa::VerifyingKey;
use sha2::{Digest, Sha256};

use crate::codec::VehicleId;
use crate::crypto::ecdsa::{self, MAX_SIGNATURE_LEN, PUBLIC_KEY_LEN, SignatureBytes};
use crate::error::{CertificateRejection, ErrorKind, Result};

pub const CERTIFICATE_VERSION: u8 = 0x01;

/// Prefix of every certificate's signed bytes. SPDU canonical bytes start
/// with the protocol version instead, so the two can never collide.
pub const CERTIFICATE_SIGNING_TAG: &[u8] = b"V2V-CERT";

/// version, subject, issuer, valid from, valid until, verification key
pub const CERTIFICATE_TBS_LEN: usize = 1 + 4 + 4 + 8 + 8 + PUBLIC_KEY_LEN;

/// Low eight bytes of the SHA-256 of the encoded certificate.
pub type HashedId8 = [u8; 8];

/// Binds a vehicle to its message-signing public key.
///
/// Wire format (big-endian):
/// ```text
/// +0   version (1)
/// +1   subject (4)
/// +5   issuer (4)
/// +9   valid from us (8)
/// +17  valid until us (8)
/// +25  verification key, SEC1 compressed (33)
/// +58  signature length (1)
/// +59  signature, DER (<= 72)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub subject: VehicleId,
    pub issuer: VehicleId,
    pub valid_from_us: u64,
    pub valid_until_us: u64,
    pub verification_key: VerifyingKey,
    pub signature: SignatureBytes,
}

impl Certificate {
    pub fn tbs_bytes(
        subject: VehicleId,
        issuer: VehicleId,
        valid_from_us: u64,
        valid_until_us: u64,
        verification_key: &VerifyingKey,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(CERTIFICATE_SIGNING_TAG.len() + CERTIFICATE_TBS_LEN);
        out.extend_from_slice(CERTIFICATE_SIGNING_TAG);
        out.push(CERTIFICATE_VERSION);
        out.extend_from_slice(&subject.0.to_be_bytes());
        out.extend_from_slice(&issuer.0.to_be_bytes());
        out.extend_from_slice(&valid_from_us.to_be_bytes());
        out.extend_from_slice(&valid_until_us.to_be_bytes());
        out.extend_from_slice(&ecdsa::public_key_bytes(verification_key));
        out
    }

    /// The exact bytes the issuer signed.
    pub fn to_be_signed(&self) -> Vec<u8> {
        Self::tbs_bytes(
            self.subject,
            self.issuer,
            self.valid_from_us,
            self.valid_until_us,
            &self.verification_key,
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        let tbs = self.to_be_signed();
        let mut out = Vec::with_capacity(CERTIFICATE_TBS_LEN + 1 + self.signature.len());
        out.extend_from_slice(&tbs[CERTIFICATE_SIGNING_TAG.len()..]);
        out.push(self.signature.len() as u8);
        out.extend_from_slice(self.signature.as_slice());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let reject =
            |reason: String| ErrorKind::InvalidCertificate(CertificateRejection::Encoding(reason));

        if bytes.len() < CERTIFICATE_TBS_LEN + 1 {
            return Err(reject(format!(
                "{} bytes is shorter than the {} byte minimum",
                bytes.len(),
                CERTIFICATE_TBS_LEN + 1
            )));
        }
        if bytes[0] != CERTIFICATE_VERSION {
            return Err(reject(format!("unsupported version {}", bytes[0])));
        }

        let u32_at = |at: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[at..at + 4]);
            u32::from_be_bytes(word)
        };
        let u64_at = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[at..at + 8]);
            u64::from_be_bytes(word)
        };

        let verification_key = VerifyingKey::from_sec1_bytes(&bytes[25..25 + PUBLIC_KEY_LEN])
            .map_err(|e| reject(format!("bad verification key: {}", e)))?;

        let signature_len = bytes[CERTIFICATE_TBS_LEN] as usize;
        if signature_len > MAX_SIGNATURE_LEN {
            return Err(reject(format!("signature length {}", signature_len)));
        }
        let start = CERTIFICATE_TBS_LEN + 1;
        if bytes.len() != start + signature_len {
            return Err(reject(format!(
                "expected {} bytes, got {}",
                start + signature_len,
                bytes.len()
            )));
        }

        Ok(Self {
            subject: VehicleId(u32_at(1)),
            issuer: VehicleId(u32_at(5)),
            valid_from_us: u64_at(9),
            valid_until_us: u64_at(17),
            verification_key,
            signature: SignatureBytes::from_slice(&bytes[start..])?,
        })
    }

    pub fn digest(&self) -> HashedId8 {
        let hash = Sha256::digest(self.encode());
        let mut id = [0u8; 8];
        id.copy_from_slice(&hash[hash.len() - 8..]);
        id
    }

    pub fn is_valid_at(&self, now_us: u64) -> bool {
        (self.valid_from_us..=self.valid_until_us).contains(&now_us)
    }

    /// Checks the issuer's signature over [`Certificate::to_be_signed`].
    pub fn verify_signature(&self, issuer_key: &VerifyingKey) -> bool {
        matches!(
            ecdsa::verify(issuer_key, &self.to_be_signed(), self.signature.as_slice()),
            Ok(true)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CertificateSigningKey, MessageSigningKey};
    use crate::pki::CertificateIssuer;

    fn issued() -> (Certificate, CertificateSigningKey) {
        let issuer_key = CertificateSigningKey::generate();
        let subject_key = MessageSigningKey::generate();
        let cert = CertificateIssuer::new(VehicleId(8), &issuer_key)
            .issue(VehicleId(8), subject_key.verifying_key(), chrono::Utc::now())
            .unwrap();
        (cert, issuer_key)
    }

    #[test]
    fn decodes_what_it_encodes() {
        let (cert, _) = issued();
        assert_eq!(Certificate::decode(&cert.encode()).unwrap(), cert);
    }

    #[test]
    fn signature_verifies_against_issuer_only() {
        let (cert, issuer_key) = issued();
        assert!(cert.verify_signature(issuer_key.verifying_key()));
        assert!(!cert.verify_signature(&cert.verification_key));
    }

    #[test]
    fn altered_subject_breaks_signature() {
        let (mut cert, issuer_key) = issued();
        cert.subject = VehicleId(9);
        assert!(!cert.verify_signature(issuer_key.verifying_key()));
    }

    #[test]
    fn truncated_encoding_is_rejected() {
        let (cert, _) = issued();
        let bytes = cert.encode();
        assert!(matches!(
            Certificate::decode(&bytes[..bytes.len() - 1]),
            Err(ErrorKind::InvalidCertificate(CertificateRejection::Encoding(_)))
        ));
        assert!(Certificate::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn digest_tracks_content() {
        let (cert, _) = issued();
        let (other, _) = issued();
        assert_eq!(cert.digest(), cert.clone().digest());
        assert_ne!(cert.digest(), other.digest());
    }

    #[test]
    fn validity_edges_are_inclusive() {
        let (cert, _) = issued();
        assert!(cert.is_valid_at(cert.valid_from_us));
        assert!(cert.is_valid_at(cert.valid_until_us));
        assert!(!cert.is_valid_at(cert.valid_until_us + 1));
        assert!(!cert.is_valid_at(cert.valid_from_us - 1));
    }
}
