//! Behavior engines.
//!
//! Each engine is an independent stateful rule set behind `BehaviorEngine`.
//! Exactly one engine is active at a time, chosen by a `UseCase` key; the
//! "general" use case runs none.

mod concealment;
mod congestion;
mod industrial;
mod loitering;
mod tripwire;

pub use concealment::{ConcealmentConfig, ConcealmentEngine};
pub use congestion::{CongestionConfig, CongestionEngine};
pub use industrial::IndustrialEngine;
pub use loitering::{LoiteringConfig, LoiteringEngine};
pub use tripwire::{Tripwire, TripwireConfig, TripwireEngine};

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::time::Instant;

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::track::Track;
use crate::Event;

/// Read-only per-frame inputs shared by all engines.
pub struct FrameContext<'a> {
    pub image: &'a RgbImage,
    pub now: Instant,
}

impl<'a> FrameContext<'a> {
    pub fn new(image: &'a RgbImage, now: Instant) -> Self {
        Self { image, now }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A stateful behavior rule set.
///
/// Engines may annotate the tracks they are handed (action labels, suspicious
/// status). Per-track state must be dropped for ids absent from `tracks`.
pub trait BehaviorEngine: Send {
    fn name(&self) -> &'static str;

    fn process_frame(&mut self, ctx: &FrameContext<'_>, tracks: &mut [Track]) -> Result<Vec<Event>>;

    fn status(&self) -> serde_json::Value;

    fn reset(&mut self);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    #[default]
    General,
    Traffic,
    Security,
    MallCctv,
    Perimeter,
    Industrial,
}

impl UseCase {
    pub const ALL: [UseCase; 6] = [
        UseCase::General,
        UseCase::Traffic,
        UseCase::Security,
        UseCase::MallCctv,
        UseCase::Perimeter,
        UseCase::Industrial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UseCase::General => "general",
            UseCase::Traffic => "traffic",
            UseCase::Security => "security",
            UseCase::MallCctv => "mall_cctv",
            UseCase::Perimeter => "perimeter",
            UseCase::Industrial => "industrial",
        }
    }

    /// Industrial scenes are wide aerial shots with small targets.
    pub fn wants_tiling(&self) -> bool {
        matches!(self, UseCase::Industrial)
    }

    pub fn wants_pose(&self) -> bool {
        matches!(self, UseCase::MallCctv)
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UseCase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        UseCase::ALL
            .into_iter()
            .find(|u| u.as_str() == key)
            .ok_or_else(|| anyhow!("unknown use case: {}", s))
    }
}

/// One instance of every engine; the active one is looked up per frame.
pub struct EngineSet {
    congestion: CongestionEngine,
    loitering: LoiteringEngine,
    concealment: ConcealmentEngine,
    tripwire: TripwireEngine,
    industrial: IndustrialEngine,
}

impl EngineSet {
    pub fn new(
        congestion: CongestionConfig,
        loitering: LoiteringConfig,
        concealment: ConcealmentConfig,
        tripwire: TripwireConfig,
    ) -> Self {
        Self {
            congestion: CongestionEngine::new(congestion),
            loitering: LoiteringEngine::new(loitering),
            concealment: ConcealmentEngine::new(concealment),
            tripwire: TripwireEngine::new(tripwire),
            industrial: IndustrialEngine::new(),
        }
    }

    pub fn get_mut(&mut self, use_case: UseCase) -> Option<&mut dyn BehaviorEngine> {
        match use_case {
            UseCase::General => None,
            UseCase::Traffic => Some(&mut self.congestion),
            UseCase::Security => Some(&mut self.loitering),
            UseCase::MallCctv => Some(&mut self.concealment),
            UseCase::Perimeter => Some(&mut self.tripwire),
            UseCase::Industrial => Some(&mut self.industrial),
        }
    }

    pub fn tripwires(&self) -> &[Tripwire] {
        self.tripwire.wires()
    }

    pub fn status(&self, use_case: UseCase) -> serde_json::Value {
        match use_case {
            UseCase::General => serde_json::json!({ "name": "general" }),
            UseCase::Traffic => self.congestion.status(),
            UseCase::Security => self.loitering.status(),
            UseCase::MallCctv => self.concealment.status(),
            UseCase::Perimeter => self.tripwire.status(),
            UseCase::Industrial => self.industrial.status(),
        }
    }

    pub fn reset_all(&mut self) {
        self.congestion.reset();
        self.loitering.reset();
        self.concealment.reset();
        self.tripwire.reset();
        self.industrial.reset();
    }
}

impl Default for EngineSet {
    fn default() -> Self {
        Self::new(
            CongestionConfig::default(),
            LoiteringConfig::default(),
            ConcealmentConfig::default(),
            TripwireConfig::default(),
        )
    }
}

/// Run one engine step, converting both errors and panics into an `Err` so a
/// faulty engine cannot take the pipeline down with it.
pub fn run_isolated(
    engine: &mut dyn BehaviorEngine,
    ctx: &FrameContext<'_>,
    tracks: &mut [Track],
) -> Result<Vec<Event>> {
    let name = engine.name();
    match catch_unwind(AssertUnwindSafe(|| engine.process_frame(ctx, tracks))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow!("engine {} panicked: {}", name, message))
        }
    }
}
