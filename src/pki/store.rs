use p256::ecdsa::VerifyingKey;
use std::collections::HashMap;
use std::sync::Arc;

use super::certificate::Certificate;
use crate::codec::VehicleId;
use crate::error::{CertificateRejection, Result};

/// Issuer id -> certificate-signing public key. Read-only once provisioned.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchors {
    issuers: HashMap<VehicleId, VerifyingKey>,
}

impl TrustAnchors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, issuer: VehicleId, key: VerifyingKey) {
        self.issuers.insert(issuer, key);
    }

    pub fn get(&self, issuer: VehicleId) -> Option<&VerifyingKey> {
        self.issuers.get(&issuer)
    }

    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }
}

/// Per-vehicle map of peer -> last known good certificate.
///
/// Entries are only added by [`CertificateStore::install`] and only removed
/// by an explicit [`CertificateStore::invalidate`]; nothing expires them.
pub struct CertificateStore {
    anchors: Arc<TrustAnchors>,
    entries: HashMap<VehicleId, Certificate>,
}

impl CertificateStore {
    pub fn new(anchors: Arc<TrustAnchors>) -> Self {
        Self {
            anchors,
            entries: HashMap::new(),
        }
    }

    pub fn lookup(&self, sender: VehicleId) -> Option<&Certificate> {
        self.entries.get(&sender)
    }

    /// Verifies `certificate` against its issuer's trust anchor and stores
    /// it for `sender`. A rejected certificate leaves the store unchanged.
    pub fn install(
        &mut self,
        sender: VehicleId,
        certificate: Certificate,
        now_us: u64,
    ) -> Result<()> {
        if certificate.subject != sender {
            return Err(CertificateRejection::SubjectMismatch {
                subject: certificate.subject,
                sender,
            }
            .into());
        }

        let issuer_key = self
            .anchors
            .get(certificate.issuer)
            .ok_or(CertificateRejection::UnknownIssuer(certificate.issuer))?;

        if !certificate.verify_signature(issuer_key) {
            return Err(CertificateRejection::BadIssuerSignature.into());
        }

        if !certificate.is_valid_at(now_us) {
            return Err(CertificateRejection::OutsideValidity {
                now_us,
                valid_from_us: certificate.valid_from_us,
                valid_until_us: certificate.valid_until_us,
            }
            .into());
        }

        log::debug!(
            "installed certificate {} for {}",
            hex::encode(certificate.digest()),
            sender
        );
        self.entries.insert(sender, certificate);
        Ok(())
    }

    pub fn invalidate(&mut self, sender: VehicleId) -> Option<Certificate> {
        self.entries.remove(&sender)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
