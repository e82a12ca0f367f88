use thiserror::Error;

use crate::codec::VehicleId;

/// Framing failures. A frame that fails here is dropped and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unsupported {field} value 0x{value:x}")]
    UnsupportedVariant { field: &'static str, value: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateRejection {
    #[error("no trust anchor for issuer {0}")]
    UnknownIssuer(VehicleId),
    #[error("issuer signature does not verify")]
    BadIssuerSignature,
    #[error("certificate not valid at {now_us} (valid {valid_from_us}..={valid_until_us})")]
    OutsideValidity {
        now_us: u64,
        valid_from_us: u64,
        valid_until_us: u64,
    },
    #[error("certificate subject {subject} does not match sender {sender}")]
    SubjectMismatch { subject: VehicleId, sender: VehicleId },
    #[error("undecodable certificate: {0}")]
    Encoding(String),
    #[error("certificate learning abandoned after {attempts} attempts")]
    LearningFailed { attempts: u32 },
    #[error("{outstanding} certificates already outstanding, sender not learned")]
    LearningSaturated { outstanding: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("signature length {len} outside the accepted envelope")]
    MalformedSignature { len: usize },

    #[error("message generated at {generated_at_us}us is outside the freshness window at {received_at_us}us")]
    StaleOrFutureMessage {
        generated_at_us: u64,
        received_at_us: u64,
    },

    #[error("invalid certificate: {0}")]
    InvalidCertificate(CertificateRejection),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("mobility trace exhausted at timestep {timestep} (trace length {len})")]
    TraceExhausted { timestep: u64, len: usize },

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("key provisioning failed: {0}")]
    Provisioning(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<CertificateRejection> for ErrorKind {
    fn from(reason: CertificateRejection) -> Self {
        ErrorKind::InvalidCertificate(reason)
    }
}

pub type Result<T> = std::result::Result<T, ErrorKind>;
