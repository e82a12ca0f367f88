use v2v_spdu::bsm::{BSM_PAYLOAD_LEN, BsmPayload, MobilityTrace};
use v2v_spdu::codec::{self, MIN_FRAME_LEN, MessageKind, Payload, VehicleId};
use v2v_spdu::crypto::{KeyMaterial, verify};
use v2v_spdu::error::ParseError;
use v2v_spdu::vehicle::seal;

fn bsm_frame(keys: &KeyMaterial, generated_at_us: u64) -> Vec<u8> {
    let trace = MobilityTrace::straight_line((42.0, -83.0), 45.0, 12.0, 0.1, 1);
    let bsm = v2v_spdu::bsm::build(keys.vehicle_id, &trace, 0).unwrap();
    let payload = Payload::from_slice(&bsm.to_bytes()).unwrap();
    seal(keys, MessageKind::Bsm, VehicleId::BROADCAST, payload, generated_at_us)
        .unwrap()
        .encode()
}

#[test]
fn frame_starts_with_llc_and_wsmp_headers() {
    let keys = KeyMaterial::generate(VehicleId(7)).unwrap();
    let frame = bsm_frame(&keys, 0x0102_0304_0506_0708);

    assert_eq!(&frame[..5], &[0xAA, 0xAA, 0x03, 0x88, 0xDC]);
    assert_eq!(&frame[5..8], &[0x03, 0x00, 0x20]);
    let wsm_len = u16::from_be_bytes([frame[8], frame[9]]) as usize;
    assert_eq!(wsm_len, frame.len() - 10);

    assert_eq!(frame[10], 0x03);
    assert_eq!(frame[11], MessageKind::Bsm as u8);
    assert_eq!(&frame[12..16], &7u32.to_be_bytes());
    assert_eq!(&frame[16..20], &[0xFF; 4]);
    assert_eq!(&frame[20..28], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(
        u16::from_be_bytes([frame[28], frame[29]]) as usize,
        BSM_PAYLOAD_LEN
    );
}

#[test]
fn decoded_frame_verifies_and_carries_the_bsm() {
    let keys = KeyMaterial::generate(VehicleId(7)).unwrap();
    let spdu = codec::decode(&bsm_frame(&keys, 1_000)).unwrap();

    assert!(
        verify(
            &keys.certificate().verification_key,
            &spdu.canonical_bytes(),
            spdu.signature.as_slice()
        )
        .unwrap()
    );
    let bsm = BsmPayload::from_bytes(spdu.payload.as_slice()).unwrap();
    assert_eq!(bsm.vehicle_id, VehicleId(7));
    assert_eq!(bsm.heading, 45.0);
}

#[test]
fn every_truncation_is_reported() {
    let keys = KeyMaterial::generate(VehicleId(7)).unwrap();
    let frame = bsm_frame(&keys, 1_000);

    for len in 0..frame.len() {
        match codec::decode(&frame[..len]) {
            Err(ParseError::Truncated { needed, available }) => {
                assert_eq!(available, len);
                assert!(needed > len);
            }
            other => panic!("prefix of {} bytes decoded as {:?}", len, other),
        }
    }
}

#[test]
fn short_frames_report_minimum_length() {
    assert_eq!(
        codec::decode(&[0xAA; 4]).unwrap_err(),
        ParseError::Truncated {
            needed: MIN_FRAME_LEN,
            available: 4
        }
    );
}

#[test]
fn unknown_constants_are_unsupported_variants() {
    let keys = KeyMaterial::generate(VehicleId(7)).unwrap();
    let frame = bsm_frame(&keys, 1_000);

    // DSAP/SSAP, EtherType, PSID, protocol version, message kind
    for offset in [0, 3, 7, 10, 11] {
        let mut bad = frame.clone();
        bad[offset] = 0x7E;
        assert!(
            matches!(
                codec::decode(&bad),
                Err(ParseError::UnsupportedVariant { .. })
            ),
            "byte {} accepted",
            offset
        );
    }
}

#[test]
fn learn_request_has_empty_payload_and_destination() {
    let keys = KeyMaterial::generate(VehicleId(1)).unwrap();
    let request = seal(&keys, MessageKind::LearnRequest, VehicleId(9), Payload::empty(), 5)
        .unwrap()
        .encode();

    let decoded = codec::decode(&request).unwrap();
    assert_eq!(decoded.header.kind, MessageKind::LearnRequest);
    assert_eq!(decoded.header.destination, VehicleId(9));
    assert!(decoded.payload.is_empty());
}
