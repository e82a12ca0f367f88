use v2v_spdu::bsm::MobilityTrace;
use v2v_spdu::codec::{self, MessageKind, Payload, VehicleId};
use v2v_spdu::crypto::{KeyMaterial, verify};
use v2v_spdu::vehicle::{now_us, seal};

fn main() -> anyhow::Result<()> {
    println!("Single Vehicle Demo\n");

    let keys = KeyMaterial::generate(VehicleId(1))?;
    println!("✓ Keys provisioned for vehicle: {}", keys.vehicle_id);

    let trace = MobilityTrace::straight_line((42.2808, -83.7430), 90.0, 13.4, 0.1, 1);
    let bsm = v2v_spdu::bsm::build(keys.vehicle_id, &trace, 0)?;
    let spdu = seal(
        &keys,
        MessageKind::Bsm,
        VehicleId::BROADCAST,
        Payload::from_slice(&bsm.to_bytes())?,
        now_us(),
    )?;
    let frame = spdu.encode();
    println!("✓ BSM framed and signed: {} bytes", frame.len());

    let decoded = codec::decode(&frame)?;
    let verified = verify(
        &keys.certificate().verification_key,
        &decoded.canonical_bytes(),
        decoded.signature.as_slice(),
    )?;
    println!("✓ Signature verified: {}", verified);
    Ok(())
}
