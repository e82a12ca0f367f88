use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ErrorKind, Result};

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Motion state of one vehicle at one logical timestep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceSample {
    pub latitude: f32,
    pub longitude: f32,
    pub elevation: f32,
    /// m/s
    pub speed: f32,
    /// degrees clockwise from north
    pub heading: f32,
}

/// Read-only sequence of samples, indexed by timestep.
#[derive(Debug, Clone, PartialEq)]
pub struct MobilityTrace {
    samples: Vec<TraceSample>,
}

impl MobilityTrace {
    pub fn new(samples: Vec<TraceSample>) -> Self {
        Self { samples }
    }

    pub fn sample(&self, timestep: u64) -> Option<&TraceSample> {
        usize::try_from(timestep)
            .ok()
            .and_then(|index| self.samples.get(index))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Synthetic trace for runs without trace files: constant speed and
    /// heading, one sample every `step_secs`.
    pub fn straight_line(
        origin: (f64, f64),
        heading_deg: f32,
        speed: f32,
        step_secs: f64,
        steps: usize,
    ) -> Self {
        let (lat0, lon0) = origin;
        let heading = (heading_deg as f64).to_radians();
        let step_m = speed as f64 * step_secs;
        let lon_scale = METERS_PER_DEGREE * lat0.to_radians().cos().max(1e-6);

        let samples = (0..steps)
            .map(|i| {
                let travelled = step_m * i as f64;
                TraceSample {
                    latitude: (lat0 + travelled * heading.cos() / METERS_PER_DEGREE) as f32,
                    longitude: (lon0 + travelled * heading.sin() / lon_scale) as f32,
                    elevation: 0.0,
                    speed,
                    heading: heading_deg,
                }
            })
            .collect();
        Self { samples }
    }
}

/// Loads a headerless CSV trace of `latitude,longitude,elevation,speed,heading` rows.
pub fn load_trace(path: impl AsRef<Path>) -> Result<MobilityTrace> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ErrorKind::Provisioning(format!("{}: {}", path.display(), e)))?;

    let mut samples = Vec::new();
    for record in reader.deserialize::<TraceSample>() {
        let sample =
            record.map_err(|e| ErrorKind::Provisioning(format!("{}: {}", path.display(), e)))?;
        samples.push(sample);
    }

    if samples.is_empty() {
        return Err(ErrorKind::Provisioning(format!(
            "{}: trace has no samples",
            path.display()
        )));
    }
    log::debug!("loaded {} trace samples from {}", samples.len(), path.display());
    Ok(MobilityTrace::new(samples))
}
