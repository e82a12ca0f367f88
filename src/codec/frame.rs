use serde::{Deserialize, Serialize};
use std::fmt;

use super::bounded::BoundedBytes;
use crate::error::ParseError;

/// LLC/SNAP header values
pub const LLC_DSAP_SSAP: u16 = 0xAAAA;
pub const LLC_CONTROL: u8 = 0x03;
pub const ETHERTYPE_WSMP: u16 = 0x88DC;

/// WSMP header values
pub const WSMP_SUBTYPE_VERSION: u8 = 0x03;
pub const WSMP_TPID: u8 = 0x00;
pub const PSID_BSM: u8 = 0x20;

pub const PROTOCOL_VERSION: u8 = 0x03;

pub const LINK_HEADER_LEN: usize = 5;
pub const WSMP_HEADER_LEN: usize = 5;
/// version, kind, sender, destination, generation time, payload length
pub const ENVELOPE_FIXED_LEN: usize = 1 + 1 + 4 + 4 + 8 + 2;
/// A frame with an empty payload and a zero-length signature.
pub const MIN_FRAME_LEN: usize = LINK_HEADER_LEN + WSMP_HEADER_LEN + ENVELOPE_FIXED_LEN + 1;

/// Largest signature field the one-byte length prefix can describe.
pub const MAX_SIGNATURE_FIELD_LEN: usize = u8::MAX as usize;
/// Largest payload that still lets the envelope fit the u16 WSM length.
pub const MAX_PAYLOAD_LEN: usize =
    u16::MAX as usize - ENVELOPE_FIXED_LEN - 1 - MAX_SIGNATURE_FIELD_LEN;

pub type Payload = BoundedBytes<MAX_PAYLOAD_LEN>;
pub type SignatureField = BoundedBytes<MAX_SIGNATURE_FIELD_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

impl VehicleId {
    pub const BROADCAST: VehicleId = VehicleId(u32::MAX);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            write!(f, "VEH-*")
        } else {
            write!(f, "VEH-{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    Bsm = 0x01,
    LearnRequest = 0x02,
    LearnResponse = 0x03,
}

impl TryFrom<u8> for MessageKind {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Bsm),
            0x02 => Ok(Self::LearnRequest),
            0x03 => Ok(Self::LearnResponse),
            other => Err(ParseError::UnsupportedVariant {
                field: "message kind",
                value: other as u32,
            }),
        }
    }
}

/// Signed header fields of the 1609.2 envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpduHeader {
    pub kind: MessageKind,
    pub sender: VehicleId,
    pub destination: VehicleId,
    /// Microseconds since the UNIX epoch.
    pub generated_at_us: u64,
}

/// One Secured Protocol Data Unit.
///
/// Wire format (big-endian):
/// ```text
/// +0   DSAP/SSAP (2)  +2 LLC control (1)  +3 EtherType (2)
/// +5   WSMP subtype/version (1)  +6 TPID (1)
/// +7   header length + PSID (1)  +8 WSM length (2)
/// +10  protocol version (1)  +11 message kind (1)
/// +12  sender (4)  +16 destination (4)  +20 generation time us (8)
/// +28  payload length (2)  +30 payload
/// +..  signature length (1)  signature (DER)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spdu {
    pub header: SpduHeader,
    pub payload: Payload,
    pub signature: SignatureField,
}

impl SpduHeader {
    /// Bytes covered by the signature: the envelope from the protocol
    /// version through the end of the payload.
    pub fn canonical_bytes(&self, payload: &Payload) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENVELOPE_FIXED_LEN + payload.len());
        out.push(PROTOCOL_VERSION);
        out.push(self.kind as u8);
        out.extend_from_slice(&self.sender.0.to_be_bytes());
        out.extend_from_slice(&self.destination.0.to_be_bytes());
        out.extend_from_slice(&self.generated_at_us.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload.as_slice());
        out
    }
}

impl Spdu {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.header.canonical_bytes(&self.payload)
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        decode(bytes)
    }
}

pub fn encode(spdu: &Spdu) -> Vec<u8> {
    let mut envelope = spdu.canonical_bytes();
    envelope.push(spdu.signature.len() as u8);
    envelope.extend_from_slice(spdu.signature.as_slice());

    let mut out = Vec::with_capacity(LINK_HEADER_LEN + WSMP_HEADER_LEN + envelope.len());
    out.extend_from_slice(&LLC_DSAP_SSAP.to_be_bytes());
    out.push(LLC_CONTROL);
    out.extend_from_slice(&ETHERTYPE_WSMP.to_be_bytes());
    out.push(WSMP_SUBTYPE_VERSION);
    out.push(WSMP_TPID);
    out.push(PSID_BSM);
    out.extend_from_slice(&(envelope.len() as u16).to_be_bytes());
    out.extend_from_slice(&envelope);
    out
}

/// Bytes past the declared WSM length are link padding and ignored. Bytes
/// inside it but after the signature make the frame invalid.
pub fn decode(bytes: &[u8]) -> Result<Spdu, ParseError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(ParseError::Truncated {
            needed: MIN_FRAME_LEN,
            available: bytes.len(),
        });
    }

    let mut reader = Reader::new(bytes);
    expect(reader.u16()? as u32, LLC_DSAP_SSAP as u32, "LLC DSAP/SSAP")?;
    expect(reader.u8()? as u32, LLC_CONTROL as u32, "LLC control")?;
    expect(reader.u16()? as u32, ETHERTYPE_WSMP as u32, "EtherType")?;
    expect(reader.u8()? as u32, WSMP_SUBTYPE_VERSION as u32, "WSMP subtype/version")?;
    expect(reader.u8()? as u32, WSMP_TPID as u32, "WSMP TPID")?;
    expect(reader.u8()? as u32, PSID_BSM as u32, "PSID")?;

    let wsm_len = reader.u16()? as usize;
    let end = reader.pos + wsm_len;
    if end > bytes.len() {
        return Err(ParseError::Truncated {
            needed: end,
            available: bytes.len(),
        });
    }
    let mut reader = Reader {
        buf: &bytes[..end],
        pos: reader.pos,
    };

    expect(reader.u8()? as u32, PROTOCOL_VERSION as u32, "protocol version")?;
    let kind = MessageKind::try_from(reader.u8()?)?;
    let sender = VehicleId(reader.u32()?);
    let destination = VehicleId(reader.u32()?);
    let generated_at_us = reader.u64()?;

    let payload_len = reader.u16()? as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ParseError::UnsupportedVariant {
            field: "payload length",
            value: payload_len as u32,
        });
    }
    let payload = reader.take(payload_len)?.to_vec();
    let signature_len = reader.u8()? as usize;
    let signature = reader.take(signature_len)?.to_vec();
    if reader.pos != end {
        return Err(ParseError::UnsupportedVariant {
            field: "WSM length",
            value: wsm_len as u32,
        });
    }

    // Lengths were checked against both capacities above.
    Ok(Spdu {
        header: SpduHeader {
            kind,
            sender,
            destination,
            generated_at_us,
        },
        payload: Payload::new(payload).map_err(|_| ParseError::UnsupportedVariant {
            field: "payload length",
            value: payload_len as u32,
        })?,
        signature: SignatureField::new(signature).map_err(|_| {
            ParseError::UnsupportedVariant {
                field: "signature length",
                value: signature_len as u32,
            }
        })?,
    })
}

fn expect(found: u32, wanted: u32, field: &'static str) -> Result<(), ParseError> {
    if found != wanted {
        return Err(ParseError::UnsupportedVariant {
            field,
            value: found,
        });
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(ParseError::Truncated {
                needed: end,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ParseError> {
        Ok(u64::from_be_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: MessageKind, payload: &[u8], signature: &[u8]) -> Spdu {
        Spdu {
            header: SpduHeader {
                kind,
                sender: VehicleId(7),
                destination: VehicleId::BROADCAST,
                generated_at_us: 1_700_000_000_123_456,
            },
            payload: Payload::from_slice(payload).unwrap(),
            signature: SignatureField::from_slice(signature).unwrap(),
        }
    }

    #[test]
    fn encodes_fixed_link_and_wsmp_values() {
        let bytes = sample(MessageKind::Bsm, &[1, 2, 3], &[9; 70]).encode();
        assert_eq!(&bytes[..10], &[0xAA, 0xAA, 0x03, 0x88, 0xDC, 0x03, 0x00, 0x20, 0x00, 94]);
        assert_eq!(bytes[10], PROTOCOL_VERSION);
        assert_eq!(bytes[11], MessageKind::Bsm as u8);
        assert_eq!(bytes.len(), 10 + 94);
    }

    #[test]
    fn round_trips_every_kind() {
        for kind in [
            MessageKind::Bsm,
            MessageKind::LearnRequest,
            MessageKind::LearnResponse,
        ] {
            let spdu = sample(kind, b"payload", &[0x30, 0x44, 0x02]);
            assert_eq!(decode(&spdu.encode()).unwrap(), spdu);
        }
    }

    #[test]
    fn round_trips_empty_payload_and_signature() {
        let spdu = sample(MessageKind::LearnRequest, &[], &[]);
        let bytes = spdu.encode();
        assert_eq!(bytes.len(), MIN_FRAME_LEN);
        assert_eq!(decode(&bytes).unwrap(), spdu);
    }

    #[test]
    fn short_buffer_is_truncated() {
        let bytes = sample(MessageKind::Bsm, &[], &[]).encode();
        for len in 0..MIN_FRAME_LEN {
            assert_eq!(
                decode(&bytes[..len]),
                Err(ParseError::Truncated {
                    needed: MIN_FRAME_LEN,
                    available: len
                })
            );
        }
    }

    #[test]
    fn cut_inside_signature_is_truncated() {
        let bytes = sample(MessageKind::Bsm, b"abc", &[1; 64]).encode();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, ParseError::Truncated { .. }));
    }

    #[test]
    fn lying_payload_length_is_truncated() {
        let mut bytes = sample(MessageKind::Bsm, b"abc", &[1; 8]).encode();
        // payload length lives at +28
        bytes[28] = 0x01;
        assert!(matches!(decode(&bytes), Err(ParseError::Truncated { .. })));
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let mut bytes = sample(MessageKind::Bsm, b"abc", &[1; 8]).encode();
        bytes[11] = 0x7F;
        assert_eq!(
            decode(&bytes),
            Err(ParseError::UnsupportedVariant {
                field: "message kind",
                value: 0x7F
            })
        );
    }

    #[test]
    fn foreign_ethertype_is_unsupported() {
        let mut bytes = sample(MessageKind::Bsm, b"abc", &[1; 8]).encode();
        bytes[3] = 0x08;
        bytes[4] = 0x00;
        assert_eq!(
            decode(&bytes),
            Err(ParseError::UnsupportedVariant {
                field: "EtherType",
                value: 0x0800
            })
        );
    }

    #[test]
    fn trailing_padding_is_ignored() {
        let spdu = sample(MessageKind::Bsm, b"abc", &[1; 8]);
        let mut bytes = spdu.encode();
        bytes.extend_from_slice(&[0; 4]);
        assert_eq!(decode(&bytes).unwrap(), spdu);
    }

    #[test]
    fn bytes_after_signature_inside_wsm_are_rejected() {
        let mut bytes = sample(MessageKind::Bsm, b"abc", &[1; 8]).encode();
        let wsm_len = u16::from_be_bytes([bytes[8], bytes[9]]) + 2;
        bytes[8..10].copy_from_slice(&wsm_len.to_be_bytes());
        bytes.extend_from_slice(&[0xEE, 0xEE]);
        assert_eq!(
            decode(&bytes),
            Err(ParseError::UnsupportedVariant {
                field: "WSM length",
                value: wsm_len as u32
            })
        );
    }

    #[test]
    fn oversized_signature_field_still_decodes() {
        let spdu = sample(MessageKind::Bsm, b"abc", &[0xAB; 100]);
        let decoded = decode(&spdu.encode()).unwrap();
        assert_eq!(decoded.signature.len(), 100);
    }

    #[test]
    fn canonical_bytes_exclude_framing_and_signature() {
        let spdu = sample(MessageKind::Bsm, b"abc", &[1; 8]);
        let canonical = spdu.canonical_bytes();
        let bytes = spdu.encode();
        assert_eq!(canonical.len(), ENVELOPE_FIXED_LEN + 3);
        assert_eq!(&bytes[10..10 + canonical.len()], canonical.as_slice());
    }
}
