use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::VerifyingKey;

use super::certificate::Certificate;
use crate::codec::VehicleId;
use crate::crypto::CertificateSigningKey;
use crate::error::{ErrorKind, Result};

pub const DEFAULT_CERTIFICATE_LIFETIME_DAYS: i64 = 365;

/// Issues certificates with a vehicle's certificate-signing key. In the
/// simulation each vehicle is the issuer of its own certificate.
pub struct CertificateIssuer<'k> {
    pub issuer_id: VehicleId,
    key: &'k CertificateSigningKey,
    lifetime: Duration,
}

impl<'k> CertificateIssuer<'k> {
    pub fn new(issuer_id: VehicleId, key: &'k CertificateSigningKey) -> Self {
        Self {
            issuer_id,
            key,
            lifetime: Duration::days(DEFAULT_CERTIFICATE_LIFETIME_DAYS),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn issue(
        &self,
        subject: VehicleId,
        subject_key: &VerifyingKey,
        issued_at: DateTime<Utc>,
    ) -> Result<Certificate> {
        let expires_at = issued_at + self.lifetime;
        let valid_from_us = to_micros(issued_at)?;
        let valid_until_us = to_micros(expires_at)?;

        let tbs = Certificate::tbs_bytes(
            subject,
            self.issuer_id,
            valid_from_us,
            valid_until_us,
            subject_key,
        );
        let signature = self.key.sign(&tbs)?;

        log::debug!(
            "{} issued certificate for {} valid until {}",
            self.issuer_id,
            subject,
            expires_at
        );

        Ok(Certificate {
            subject,
            issuer: self.issuer_id,
            valid_from_us,
            valid_until_us,
            verification_key: subject_key.clone(),
            signature,
        })
    }
}

fn to_micros(at: DateTime<Utc>) -> Result<u64> {
    u64::try_from(at.timestamp_micros())
        .map_err(|_| ErrorKind::Provisioning(format!("timestamp {} predates the epoch", at)))
}
