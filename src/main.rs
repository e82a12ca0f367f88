use anyhow::{Context, Result};
use std::sync::Arc;

use v2v_spdu::bsm::{MobilityTrace, load_trace};
use v2v_spdu::codec::VehicleId;
use v2v_spdu::config::SimulationConfig;
use v2v_spdu::crypto::KeyMaterial;
use v2v_spdu::network::{self, BroadcastMedium, DatagramReceiver, DatagramSender};
use v2v_spdu::pki::TrustAnchors;
use v2v_spdu::vehicle::{LogSink, PresentationSink, SessionHandle, VehicleSession};

/// Ann Arbor, MI.
const SYNTHETIC_ORIGIN: (f64, f64) = (42.2808, -83.7430);
const SYNTHETIC_SPEED_MPS: f32 = 13.4;
const SYNTHETIC_STEPS: usize = 600;

fn load_config() -> Result<SimulationConfig> {
    match std::env::args().nth(1) {
        Some(path) => SimulationConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path)),
        None => {
            let config = SimulationConfig::default();
            config.validate().context("default configuration")?;
            Ok(config)
        }
    }
}

fn provision(config: &SimulationConfig, vehicle_id: VehicleId) -> Result<KeyMaterial> {
    match &config.key_dir {
        Some(dir) => KeyMaterial::load(dir, vehicle_id)
            .with_context(|| format!("loading keys for {} from {}", vehicle_id, dir.display())),
        None => KeyMaterial::generate(vehicle_id)
            .with_context(|| format!("generating keys for {}", vehicle_id)),
    }
}

fn trace_for(config: &SimulationConfig, index: usize, vehicle_id: VehicleId) -> Result<MobilityTrace> {
    match &config.trace_dir {
        Some(dir) => {
            let path = dir.join(format!("{}.csv", vehicle_id.0));
            load_trace(&path).with_context(|| format!("loading trace {}", path.display()))
        }
        None => {
            // Spread vehicles out so their tracks are distinguishable.
            let origin = (
                SYNTHETIC_ORIGIN.0 + 0.0005 * index as f64,
                SYNTHETIC_ORIGIN.1,
            );
            let heading = (index * 90 % 360) as f32;
            let steps = config
                .messages_per_vehicle
                .map_or(SYNTHETIC_STEPS, |n| n.max(1) as usize);
            Ok(MobilityTrace::straight_line(
                origin,
                heading,
                SYNTHETIC_SPEED_MPS,
                config.bsm_interval_ms as f64 / 1000.0,
                steps,
            ))
        }
    }
}

async fn attach(
    config: &SimulationConfig,
    medium: &Arc<BroadcastMedium>,
    index: usize,
) -> Result<(Arc<dyn DatagramSender>, Box<dyn DatagramReceiver>)> {
    match &config.udp {
        Some(udp) => {
            let peers = (0..config.vehicles)
                .filter(|&other| other != index)
                .map(|other| udp.address(other))
                .collect();
            let (tx, rx) = network::udp::bind(udp.address(index), peers)
                .await
                .with_context(|| format!("binding UDP transport on {}", udp.address(index)))?;
            Ok((Arc::new(tx), Box::new(rx)))
        }
        None => {
            let (tx, rx) = medium.attach();
            Ok((Arc::new(tx), Box::new(rx)))
        }
    }
}

async fn wait_for_transmitters(handles: &mut [SessionHandle]) {
    for handle in handles.iter_mut() {
        let ticks = handle.transmit_finished().await;
        log::debug!("{} finished transmitting after {} ticks", handle.vehicle_id, ticks);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;

    println!("╔═══════════════════════════════════════════════════════╗");
    println!("║        Secure V2V BSM Simulation (IEEE 1609.2)        ║");
    println!("╚═══════════════════════════════════════════════════════╝");
    log::info!(
        "{} vehicles, {} BSMs each every {} ms, transport: {}",
        config.vehicles,
        config
            .messages_per_vehicle
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
        config.bsm_interval_ms,
        if config.udp.is_some() { "udp" } else { "in-memory medium" }
    );

    let mut keys = Vec::with_capacity(config.vehicles);
    let mut anchors = TrustAnchors::new();
    for vehicle_id in config.vehicle_ids() {
        let material = provision(&config, vehicle_id)?;
        anchors.insert(
            vehicle_id,
            material.certificate_key().verifying_key().clone(),
        );
        keys.push(material);
    }
    let anchors = Arc::new(anchors);
    log::info!("provisioned {} vehicles", keys.len());

    let medium = BroadcastMedium::new(config.medium.capacity, config.medium.loss_probability)
        .context("creating broadcast medium")?;
    let sink: Arc<dyn PresentationSink> = Arc::new(LogSink);

    let mut handles = Vec::with_capacity(keys.len());
    for (index, material) in keys.into_iter().enumerate() {
        let vehicle_id = material.vehicle_id;
        let trace = trace_for(&config, index, vehicle_id)?;
        let (tx, rx) = attach(&config, &medium, index).await?;
        let session = VehicleSession::new(material, trace, anchors.clone(), config.session_config())
            .with_sink(sink.clone());
        handles.push(session.spawn(tx, rx));
    }

    tokio::select! {
        _ = wait_for_transmitters(&mut handles) => {
            log::info!("all vehicles finished transmitting, draining for {} ms", config.drain_ms);
            tokio::time::sleep(config.drain()).await;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            log::info!("interrupted, shutting down");
        }
    }

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(handle.shutdown().await);
    }

    for metrics in &reports {
        metrics.print_report();
        if let Some(path) = &config.metrics_csv {
            match metrics.save_to_csv(path) {
                Ok(_) => log::info!("metrics for {} saved to {}", metrics.vehicle_id, path.display()),
                Err(e) => log::error!("error saving {}: {}", path.display(), e),
            }
        }
    }

    if config.udp.is_none() {
        log::info!(
            "medium carried {} frames, dropped {}",
            medium.get_message_count(),
            medium.get_dropped_count()
        );
    }
    Ok(())
}
