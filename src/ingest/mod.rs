//! Frame acquisition.
//!
//! Every source implements `Sensor`:
//! - `stub://name`: synthetic moving scene (simulation, demos, tests)
//! - local image directories or files, looped (video files need feature: ingest-ffmpeg)
//! - live stream URLs via FFmpeg (feature: ingest-ffmpeg); never looped
//! - `pool:a,b,...`: up to four sensors composed into a 2x2 grid
//!
//! Read failures are reported to the caller, which retries; a sensor error is
//! never fatal to the pipeline.

#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod ffmpeg;
pub mod file;
pub mod pool;
pub mod stream;
pub mod synthetic;

use std::path::PathBuf;

use anyhow::{bail, Result};
use image::RgbImage;

pub use file::FileSensor;
pub use pool::SensorPool;
pub use stream::StreamSensor;
pub use synthetic::{SyntheticScene, SyntheticSensor};

/// A frame source.
pub trait Sensor: Send {
    fn name(&self) -> &str;

    /// Open the underlying resource. Calling it again reconnects.
    fn connect(&mut self) -> Result<()>;

    /// Read the next frame.
    fn read(&mut self) -> Result<RgbImage>;

    /// Release the underlying resource. Safe to call more than once.
    fn disconnect(&mut self);
}

/// Parsed source string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    Synthetic(String),
    File(PathBuf),
    Live(String),
    Pool(Vec<SourceSpec>),
}

impl SourceSpec {
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            bail!("source must not be empty");
        }
        if let Some(members) = source.strip_prefix("pool:") {
            let specs = members
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(|m| {
                    if m.starts_with("pool:") {
                        bail!("nested pools are not supported: {}", m);
                    }
                    SourceSpec::parse(m)
                })
                .collect::<Result<Vec<_>>>()?;
            if specs.is_empty() {
                bail!("pool source lists no members");
            }
            return Ok(SourceSpec::Pool(specs));
        }
        if let Some(name) = source.strip_prefix("stub://") {
            return Ok(SourceSpec::Synthetic(name.to_string()));
        }
        if source.contains("://") {
            return Ok(SourceSpec::Live(source.to_string()));
        }
        Ok(SourceSpec::File(PathBuf::from(source)))
    }

    pub fn is_synthetic(&self) -> bool {
        match self {
            SourceSpec::Synthetic(_) => true,
            SourceSpec::Pool(members) => members.iter().all(SourceSpec::is_synthetic),
            _ => false,
        }
    }
}

/// Build an unconnected sensor for a source spec.
pub fn open_sensor(spec: &SourceSpec) -> Result<Box<dyn Sensor>> {
    Ok(match spec {
        SourceSpec::Synthetic(name) => Box::new(SyntheticSensor::new(name)),
        SourceSpec::File(path) => Box::new(FileSensor::new(path.clone())),
        SourceSpec::Live(url) => Box::new(StreamSensor::new(url.clone())),
        SourceSpec::Pool(members) => {
            let sensors = members.iter().map(open_sensor).collect::<Result<Vec<_>>>()?;
            Box::new(SensorPool::new(sensors))
        }
    })
}
