use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{DerSignature, Signature, SigningKey, VerifyingKey};

use crate::codec::BoundedBytes;
use crate::error::{ErrorKind, Result};

/// DER-encoded ECDSA P-256 signatures never exceed 72 bytes.
pub const MAX_SIGNATURE_LEN: usize = 72;
/// SEQUENCE header plus two minimal INTEGERs.
pub const MIN_SIGNATURE_LEN: usize = 8;
/// SEC1 compressed point.
pub const PUBLIC_KEY_LEN: usize = 33;

pub type SignatureBytes = BoundedBytes<MAX_SIGNATURE_LEN>;

pub fn sign(key: &SigningKey, canonical: &[u8]) -> Result<SignatureBytes> {
    let signature: DerSignature = key.sign(canonical);
    SignatureBytes::from_slice(signature.as_bytes())
}

/// `Ok(false)` for a well-sized signature that does not verify (including
/// undecodable DER); `MalformedSignature` when the length alone rules it out.
pub fn verify(public_key: &VerifyingKey, canonical: &[u8], signature: &[u8]) -> Result<bool> {
    if !(MIN_SIGNATURE_LEN..=MAX_SIGNATURE_LEN).contains(&signature.len()) {
        return Err(ErrorKind::MalformedSignature {
            len: signature.len(),
        });
    }
    let Ok(signature) = Signature::from_der(signature) else {
        return Ok(false);
    };
    Ok(public_key.verify(canonical, &signature).is_ok())
}

pub fn public_key_bytes(key: &VerifyingKey) -> [u8; PUBLIC_KEY_LEN] {
    let point = key.to_encoded_point(true);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(point.as_bytes());
    out
}

pub fn public_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey> {
    VerifyingKey::from_sec1_bytes(bytes)
        .map_err(|e| ErrorKind::MalformedPayload(format!("bad public key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn signature_verifies() {
        let key = SigningKey::random(&mut OsRng);
        let message = b"canonical bytes";
        let signature = sign(&key, message).unwrap();
        assert!(signature.len() <= MAX_SIGNATURE_LEN);
        assert!(verify(key.verifying_key(), message, signature.as_slice()).unwrap());
    }

    #[test]
    fn any_flipped_message_bit_fails() {
        let key = SigningKey::random(&mut OsRng);
        let message = b"position 42.1 -83.2".to_vec();
        let signature = sign(&key, &message).unwrap();

        for bit in 0..message.len() * 8 {
            let mut tampered = message.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            assert!(!verify(key.verifying_key(), &tampered, signature.as_slice()).unwrap());
        }
    }

    #[test]
    fn any_flipped_signature_bit_fails() {
        let key = SigningKey::random(&mut OsRng);
        let message = b"heading 90";
        let signature = sign(&key, message).unwrap().into_vec();

        for bit in 0..signature.len() * 8 {
            let mut tampered = signature.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            assert!(!verify(key.verifying_key(), message, &tampered).unwrap());
        }
    }

    #[test]
    fn wrong_key_fails() {
        let key = SigningKey::random(&mut OsRng);
        let other = SigningKey::random(&mut OsRng);
        let signature = sign(&key, b"msg").unwrap();
        assert!(!verify(other.verifying_key(), b"msg", signature.as_slice()).unwrap());
    }

    #[test]
    fn out_of_envelope_lengths_are_malformed() {
        let key = SigningKey::random(&mut OsRng);
        for len in [0, MIN_SIGNATURE_LEN - 1, MAX_SIGNATURE_LEN + 1, 255] {
            assert_eq!(
                verify(key.verifying_key(), b"msg", &vec![0x30; len]),
                Err(ErrorKind::MalformedSignature { len })
            );
        }
    }

    #[test]
    fn public_key_bytes_round_trip() {
        let key = SigningKey::random(&mut OsRng);
        let bytes = public_key_bytes(key.verifying_key());
        assert_eq!(&public_key_from_bytes(&bytes).unwrap(), key.verifying_key());
    }
}
