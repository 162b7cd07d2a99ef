use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Deserialize;

use crate::engines::{BehaviorEngine, FrameContext};
use crate::track::Track;
use crate::{Event, Severity};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoiteringConfig {
    pub limit_secs: f64,
    /// After an alert the reference time is pushed this far into the future.
    pub rearm_secs: f64,
}

impl Default for LoiteringConfig {
    fn default() -> Self {
        Self {
            limit_secs: 15.0,
            rearm_secs: 60.0,
        }
    }
}

/// Warns when a person stays in view longer than `limit_secs`.
pub struct LoiteringEngine {
    config: LoiteringConfig,
    /// Track id -> dwell reference time (may lie in the future after an alert).
    dwell_since: HashMap<u64, Instant>,
}

impl LoiteringEngine {
    pub fn new(config: LoiteringConfig) -> Self {
        Self {
            config,
            dwell_since: HashMap::new(),
        }
    }
}

impl BehaviorEngine for LoiteringEngine {
    fn name(&self) -> &'static str {
        "loitering"
    }

    fn process_frame(&mut self, ctx: &FrameContext<'_>, tracks: &mut [Track]) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for person in tracks.iter().filter(|t| t.is("person")) {
            let since = *self.dwell_since.entry(person.id).or_insert(ctx.now);
            let dwell = ctx.now.saturating_duration_since(since).as_secs_f64();
            if dwell > self.config.limit_secs {
                events.push(
                    Event::new(
                        "loitering",
                        Severity::Warning,
                        "Loitering Alert",
                        format!(
                            "Person {} has been stationary in view for >{}s",
                            person.display_name(),
                            dwell as u64
                        ),
                    )
                    .with_track(person.id),
                );
                self.dwell_since.insert(
                    person.id,
                    ctx.now + Duration::from_secs_f64(self.config.rearm_secs),
                );
            }
        }

        self.dwell_since
            .retain(|id, _| tracks.iter().any(|t| t.id == *id && t.is("person")));
        Ok(events)
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "threat_level": if self.dwell_since.is_empty() { "LOW" } else { "ELEVATED" },
            "active_monitors": self.dwell_since.len(),
        })
    }

    fn reset(&mut self) {
        self.dwell_since.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;
    use image::RgbImage;

    fn person(id: u64) -> Track {
        Track::new(id, "person", BBox::new(0.0, 0.0, 20.0, 40.0), 0.9)
    }

    #[test]
    fn alerts_after_limit_then_rearms_for_a_minute() {
        let image = RgbImage::new(16, 16);
        let mut engine = LoiteringEngine::new(LoiteringConfig::default());
        let t0 = Instant::now();
        let mut tracks = vec![person(1)];
        let mut step = |secs: u64| {
            engine
                .process_frame(
                    &FrameContext::new(&image, t0 + Duration::from_secs(secs)),
                    &mut tracks,
                )
                .unwrap()
                .len()
        };
        assert_eq!(step(0), 0);
        assert_eq!(step(15), 0);
        assert_eq!(step(16), 1);
        assert_eq!(step(40), 0);
        // Reference is now 16 + 60 = 76, so the next alert is after 91 s.
        assert_eq!(step(91), 0);
        assert_eq!(step(92), 1);
    }

    #[test]
    fn state_is_dropped_when_person_leaves() {
        let image = RgbImage::new(16, 16);
        let mut engine = LoiteringEngine::new(LoiteringConfig::default());
        let t0 = Instant::now();
        engine
            .process_frame(&FrameContext::new(&image, t0), &mut [person(1), person(2)])
            .unwrap();
        assert_eq!(engine.status()["active_monitors"], 2);
        engine
            .process_frame(
                &FrameContext::new(&image, t0 + Duration::from_secs(1)),
                &mut [person(2)],
            )
            .unwrap();
        assert_eq!(engine.status()["active_monitors"], 1);

        // Returning after a gap starts a fresh dwell.
        let back = t0 + Duration::from_secs(20);
        let events = engine
            .process_frame(&FrameContext::new(&image, back), &mut [person(1), person(2)])
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].track_id, Some(2));
    }
}
