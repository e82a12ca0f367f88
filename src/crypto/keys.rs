use p256::SecretKey;
use p256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};

use super::ecdsa::{self, SignatureBytes};
use crate::codec::VehicleId;
use crate::error::{ErrorKind, Result};
use crate::pki::{Certificate, CertificateIssuer};

/// Signs SPDUs. Never used for certificates.
pub struct MessageSigningKey(SigningKey);

/// Signs certificates. Never used for SPDUs.
pub struct CertificateSigningKey(SigningKey);

impl MessageSigningKey {
    pub fn generate() -> Self {
        Self(SigningKey::random(&mut OsRng))
    }

    pub fn sign(&self, canonical: &[u8]) -> Result<SignatureBytes> {
        ecdsa::sign(&self.0, canonical)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.0.verifying_key()
    }
}

impl CertificateSigningKey {
    pub fn generate() -> Self {
        Self(SigningKey::random(&mut OsRng))
    }

    pub fn sign(&self, to_be_signed: &[u8]) -> Result<SignatureBytes> {
        ecdsa::sign(&self.0, to_be_signed)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.0.verifying_key()
    }
}

/// Everything a vehicle signs with, owned for the vehicle's lifetime.
pub struct KeyMaterial {
    pub vehicle_id: VehicleId,
    message_key: MessageSigningKey,
    certificate_key: CertificateSigningKey,
    certificate: Certificate,
}

impl KeyMaterial {
    pub fn new(
        vehicle_id: VehicleId,
        message_key: MessageSigningKey,
        certificate_key: CertificateSigningKey,
        certificate: Certificate,
    ) -> Result<Self> {
        if certificate.subject != vehicle_id {
            return Err(ErrorKind::Provisioning(format!(
                "certificate subject {} does not match {}",
                certificate.subject, vehicle_id
            )));
        }
        if &certificate.verification_key != message_key.verifying_key() {
            return Err(ErrorKind::Provisioning(format!(
                "certificate for {} does not bind its message-signing key",
                vehicle_id
            )));
        }
        Ok(Self {
            vehicle_id,
            message_key,
            certificate_key,
            certificate,
        })
    }

    /// Fresh keys and a self-issued certificate, for headless runs.
    pub fn generate(vehicle_id: VehicleId) -> Result<Self> {
        let message_key = MessageSigningKey::generate();
        let certificate_key = CertificateSigningKey::generate();
        Self::with_issued_certificate(vehicle_id, message_key, certificate_key)
    }

    /// Loads `<dir>/<id>/message.pem` and `<dir>/<id>/certificate.pem`.
    pub fn load(dir: impl AsRef<Path>, vehicle_id: VehicleId) -> Result<Self> {
        let (message_path, certificate_path) = key_paths(dir, vehicle_id);
        let message_key = load_message_signing_key(message_path)?;
        let certificate_key = load_certificate_signing_key(certificate_path)?;
        Self::with_issued_certificate(vehicle_id, message_key, certificate_key)
    }

    fn with_issued_certificate(
        vehicle_id: VehicleId,
        message_key: MessageSigningKey,
        certificate_key: CertificateSigningKey,
    ) -> Result<Self> {
        let certificate = CertificateIssuer::new(vehicle_id, &certificate_key).issue(
            vehicle_id,
            message_key.verifying_key(),
            chrono::Utc::now(),
        )?;
        Self::new(vehicle_id, message_key, certificate_key, certificate)
    }

    pub fn message_key(&self) -> &MessageSigningKey {
        &self.message_key
    }

    pub fn certificate_key(&self) -> &CertificateSigningKey {
        &self.certificate_key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

pub fn load_message_signing_key(path: impl AsRef<Path>) -> Result<MessageSigningKey> {
    read_sec1_pem(path.as_ref()).map(MessageSigningKey)
}

pub fn load_certificate_signing_key(path: impl AsRef<Path>) -> Result<CertificateSigningKey> {
    read_sec1_pem(path.as_ref()).map(CertificateSigningKey)
}

fn read_sec1_pem(path: &Path) -> Result<SigningKey> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| ErrorKind::Provisioning(format!("{}: {}", path.display(), e)))?;
    let secret = SecretKey::from_sec1_pem(&pem)
        .map_err(|e| ErrorKind::Provisioning(format!("{}: {}", path.display(), e)))?;
    log::debug!("loaded signing key from {}", path.display());
    Ok(SigningKey::from(secret))
}

pub fn key_paths(dir: impl AsRef<Path>, vehicle_id: VehicleId) -> (PathBuf, PathBuf) {
    let vehicle_dir = dir.as_ref().join(vehicle_id.0.to_string());
    (
        vehicle_dir.join("message.pem"),
        vehicle_dir.join("certificate.pem"),
    )
}
