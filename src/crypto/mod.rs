pub mod ecdsa;
pub mod keys;

pub use ecdsa::{MAX_SIGNATURE_LEN, SignatureBytes, sign, verify};
pub use keys::{
    CertificateSigningKey, KeyMaterial, MessageSigningKey, load_certificate_signing_key,
    load_message_signing_key,
};
