use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use crate::codec::VehicleId;
use crate::error::{ErrorKind, Result};
use crate::trust::{FreshnessWindow, LearningPolicy};
use crate::vehicle::{SessionConfig, TracePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediumConfig {
    pub loss_probability: f64,
    /// Frames buffered per receiver before the slowest one starts lagging.
    pub capacity: usize,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            loss_probability: 0.0,
            capacity: 1024,
        }
    }
}

/// Replaces the in-memory medium with real sockets: vehicle `i` binds
/// `host:base_port + i` and sends to every other vehicle's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub host: IpAddr,
    pub base_port: u16,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 47_000,
        }
    }
}

impl UdpConfig {
    pub fn address(&self, index: usize) -> SocketAddr {
        SocketAddr::new(self.host, self.base_port + index as u16)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub vehicles: usize,
    pub messages_per_vehicle: Option<u64>,
    pub bsm_interval_ms: u64,
    pub freshness: FreshnessWindow,
    pub learning: LearningPolicy,
    pub trace_policy: TracePolicy,
    pub medium: MediumConfig,
    pub udp: Option<UdpConfig>,
    /// Directory of `<id>.csv` traces; synthetic traces are used when unset.
    pub trace_dir: Option<PathBuf>,
    /// Directory of `<id>/message.pem` and `<id>/certificate.pem`; keys are
    /// generated when unset.
    pub key_dir: Option<PathBuf>,
    pub metrics_csv: Option<PathBuf>,
    /// How long receivers keep running after the last BSM was sent.
    pub drain_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            vehicles: 3,
            messages_per_vehicle: Some(50),
            bsm_interval_ms: 100,
            freshness: FreshnessWindow::default(),
            learning: LearningPolicy::default(),
            trace_policy: TracePolicy::default(),
            medium: MediumConfig::default(),
            udp: None,
            trace_dir: None,
            key_dir: None,
            metrics_csv: None,
            drain_ms: 500,
        }
    }
}

impl SimulationConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ErrorKind::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ErrorKind::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vehicles == 0 {
            return Err(ErrorKind::Config("at least one vehicle is required".into()));
        }
        if self.vehicles as u64 >= u64::from(VehicleId::BROADCAST.0) {
            return Err(ErrorKind::Config(format!("too many vehicles: {}", self.vehicles)));
        }
        if self.bsm_interval_ms == 0 {
            return Err(ErrorKind::Config("bsm_interval_ms must be non-zero".into()));
        }
        if self.learning.max_attempts == 0 {
            return Err(ErrorKind::Config("learning.max_attempts must be non-zero".into()));
        }
        if self.learning.pending_capacity == 0 {
            return Err(ErrorKind::Config(
                "learning.pending_capacity must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.medium.loss_probability) {
            return Err(ErrorKind::Config(format!(
                "medium.loss_probability {} outside 0..=1",
                self.medium.loss_probability
            )));
        }
        if let Some(udp) = &self.udp
            && usize::from(udp.base_port) + self.vehicles > usize::from(u16::MAX) + 1
        {
            return Err(ErrorKind::Config(format!(
                "{} vehicles do not fit above UDP port {}",
                self.vehicles, udp.base_port
            )));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            bsm_interval: Duration::from_millis(self.bsm_interval_ms),
            message_count: self.messages_per_vehicle,
            trace_policy: self.trace_policy,
            freshness: self.freshness,
            learning: self.learning,
        }
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    /// Vehicle ids start at 1.
    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> {
        (1..=self.vehicles as u32).map(VehicleId)
    }
}
