//! Signed V2V Basic Safety Message exchange: WAVE/1609.2-style framing,
//! ECDSA P-256 signing and verification, a per-vehicle certificate store and
//! a learning protocol for certificates of unknown senders.

pub mod bsm;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod network;
pub mod pki;
pub mod trust;
pub mod vehicle;

pub use error::{CertificateRejection, ErrorKind, ParseError, Result};
