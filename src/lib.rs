//! Perception Kernel
//!
//! Real-time perception pipeline for video surveillance: frames in, tracked
//! objects with stable identities and security events out.
//!
//! # Architecture
//!
//! One worker loop per pipeline drives every stage in order:
//!
//! 1. **Ingest**: read a frame from a sensor (synthetic, file, live, or a 2x2 pool).
//! 2. **Detect**: run the active provider on a detection-proxy frame, optionally
//!    tiled, and rescale results to display coordinates.
//! 3. **Track**: centroid association assigns transient ids; the identity
//!    registry promotes them to persistent ids with lock strength.
//! 4. **Behave**: the engine selected by the active use case, then the zone engine.
//! 5. **Publish**: events, periodic track snapshots, and an annotated JPEG.
//!
//! A failure in one stage never stops the loop: provider errors fall back to
//! motion detection, engine failures are logged and skipped, sensor read
//! errors are retried.
//!
//! # Module Structure
//!
//! - `detect`: detections, providers, provider registry, tiling
//! - `track`: centroid associator and persistent identity registry
//! - `engines`: behavior engines and use-case dispatch
//! - `zones`: polygon zones and intrusion events
//! - `ingest`: frame sources
//! - `frame`: display/proxy derivation, grid composition, latest-frame slot
//! - `render`: annotation overlays and JPEG encoding
//! - `orchestrator`: the per-frame cycle and its worker thread
//! - `sink`: delivery of events and snapshots to the host

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod detect;
pub mod engines;
pub mod frame;
pub mod ingest;
pub mod orchestrator;
pub mod render;
pub mod sink;
pub mod track;
pub mod zones;

pub use config::PerceptionConfig;
pub use detect::{BBox, Detection, DetectionCapability, DetectionProvider, Keypoint, Point};
pub use engines::{BehaviorEngine, EngineSet, FrameContext, UseCase};
pub use ingest::{open_sensor, Sensor, SourceSpec};
pub use orchestrator::{CycleOutput, Orchestrator, Pipeline, PipelineOptions};
pub use sink::{ChannelSink, EventSink, SinkMessage};
pub use track::{CentroidAssociator, IdentityRegistry, Track, TrackStatus};
pub use zones::{Zone, ZoneEngine, ZoneType};

// -------------------- Events --------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A security event. Built once by the stage that detects it and never
/// modified afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Event {
    /// New event stamped now. `kind` prefixes a random id, e.g. `zone-1f03a9c2e07b5d44`.
    pub fn new(
        kind: &str,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("{}-{}", kind, hex::encode(rand::random::<[u8; 8]>())),
            timestamp: Utc::now(),
            severity,
            title: title.into(),
            description: description.into(),
            zone_id: None,
            track_id: None,
            metadata: None,
        }
    }

    pub fn with_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone_id = Some(zone_id.into());
        self
    }

    pub fn with_track(mut self, track_id: u64) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The prefix given to `Event::new`.
    pub fn kind(&self) -> &str {
        self.id.rsplit_once('-').map_or(self.id.as_str(), |(kind, _)| kind)
    }
}
