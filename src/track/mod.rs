//! Frame-to-frame tracking.
//!
//! `CentroidAssociator` turns per-frame detections into transient track ids;
//! `IdentityRegistry` layers durable, human-facing identities and lock
//! strength on top of those ids.

mod associator;
mod registry;

pub use associator::{CentroidAssociator, DEFAULT_MAX_DISAPPEARED, DEFAULT_MAX_DISTANCE};
pub use registry::{IdentityRegistry, COAST_SECS, REMOVE_AFTER_SECS};

use serde::{Deserialize, Serialize};

use crate::detect::{BBox, Keypoint, Point};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    #[default]
    Active,
    Locked,
    Lost,
    Suspicious,
}

/// A tracked object as seen by engines, zones and rendering.
///
/// `id` is the session-scoped associator id; `persistent_id` is filled in by
/// the identity registry once the track has been observed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Point>,
    #[serde(default)]
    pub history: Vec<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
    pub status: TrackStatus,
    pub lock_strength: f32,
    pub detection_count: u32,
    pub avg_confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<Vec<Keypoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Consecutive associator updates without a matching detection.
    #[serde(skip)]
    pub disappeared: u32,
}

impl Track {
    pub fn new(id: u64, label: impl Into<String>, bbox: BBox, confidence: f32) -> Self {
        Self {
            id,
            label: label.into(),
            confidence,
            bbox,
            velocity: None,
            history: Vec::new(),
            persistent_id: None,
            status: TrackStatus::Active,
            lock_strength: 0.0,
            detection_count: 0,
            avg_confidence: confidence,
            keypoints: None,
            action: None,
            disappeared: 0,
        }
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }

    /// Case-insensitive label comparison.
    pub fn is(&self, label: &str) -> bool {
        self.label.eq_ignore_ascii_case(label)
    }

    /// Label used in titles and overlays: the persistent id when known.
    pub fn display_name(&self) -> String {
        match &self.persistent_id {
            Some(pid) => pid.clone(),
            None => format!("{}#{}", self.label.to_lowercase(), self.id),
        }
    }
}
