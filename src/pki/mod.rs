pub mod certificate;
pub mod issuer;
pub mod store;

pub use certificate::{Certificate, HashedId8};
pub use issuer::CertificateIssuer;
pub use store::{CertificateStore, TrustAnchors};
