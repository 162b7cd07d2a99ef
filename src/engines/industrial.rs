use anyhow::Result;

use crate::engines::{BehaviorEngine, FrameContext};
use crate::track::Track;
use crate::{Event, Severity};

const TARGET_CLASSES: [&str; 4] = ["person", "truck", "tool", "oil_drum"];
const PRIORITY_CLASS: &str = "oil_drum";

/// Aerial pipeline watch. Every oil drum in view is a priority sighting; there
/// is no cooldown, so each frame with a drum reports it.
#[derive(Default)]
pub struct IndustrialEngine {
    targets: usize,
    sightings: u64,
}

impl IndustrialEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BehaviorEngine for IndustrialEngine {
    fn name(&self) -> &'static str {
        "industrial"
    }

    fn process_frame(&mut self, _ctx: &FrameContext<'_>, tracks: &mut [Track]) -> Result<Vec<Event>> {
        let targets: Vec<&Track> = tracks
            .iter()
            .filter(|t| TARGET_CLASSES.iter().any(|c| t.is(c)))
            .collect();
        self.targets = targets.len();

        let events: Vec<Event> = targets
            .into_iter()
            .filter(|t| t.is(PRIORITY_CLASS))
            .map(|t| {
                Event::new(
                    "theft-attempt",
                    Severity::Critical,
                    "Pipeline Theft Suspected",
                    "Unauthorized extraction equipment detected via drone link.",
                )
                .with_track(t.id)
            })
            .collect();
        self.sightings += events.len() as u64;
        Ok(events)
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "targets_in_view": self.targets,
            "priority_sightings": self.sightings,
            "tiling": "enabled",
        })
    }

    fn reset(&mut self) {
        self.targets = 0;
        self.sightings = 0;
    }
}
