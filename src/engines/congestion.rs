use std::time::Instant;

use anyhow::Result;
use serde::Deserialize;

use crate::engines::{BehaviorEngine, FrameContext};
use crate::track::Track;
use crate::{Event, Severity};

const VEHICLE_CLASSES: [&str; 5] = ["car", "truck", "bus", "motorcycle", "vehicle"];

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CongestionConfig {
    /// Vehicles in view that count as congestion.
    pub threshold: usize,
    /// Seconds the count must hold before a warning.
    pub delay_secs: f64,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            delay_secs: 10.0,
        }
    }
}

/// Traffic congestion: warns once per `delay_secs` while the vehicle count
/// stays at or above `threshold`.
pub struct CongestionEngine {
    config: CongestionConfig,
    vehicle_count: usize,
    since: Option<Instant>,
}

impl CongestionEngine {
    pub fn new(config: CongestionConfig) -> Self {
        Self {
            config,
            vehicle_count: 0,
            since: None,
        }
    }
}

impl BehaviorEngine for CongestionEngine {
    fn name(&self) -> &'static str {
        "congestion"
    }

    fn process_frame(&mut self, ctx: &FrameContext<'_>, tracks: &mut [Track]) -> Result<Vec<Event>> {
        self.vehicle_count = tracks
            .iter()
            .filter(|t| VEHICLE_CLASSES.iter().any(|c| t.is(c)))
            .count();

        if self.vehicle_count < self.config.threshold {
            self.since = None;
            return Ok(Vec::new());
        }

        let since = *self.since.get_or_insert(ctx.now);
        let elapsed = ctx.now.saturating_duration_since(since).as_secs_f64();
        if elapsed <= self.config.delay_secs {
            return Ok(Vec::new());
        }

        self.since = Some(ctx.now);
        log::info!("congestion: {} vehicles for {:.1}s", self.vehicle_count, elapsed);
        Ok(vec![Event::new(
            "traffic",
            Severity::Warning,
            "Traffic Congestion",
            format!(
                "Persistent buildup detected: {} vehicles currently stalled in monitored sector.",
                self.vehicle_count
            ),
        )])
    }

    fn status(&self) -> serde_json::Value {
        let density = (self.vehicle_count as f64 / 10.0 * 100.0).min(100.0);
        serde_json::json!({
            "name": self.name(),
            "active_vehicles": self.vehicle_count,
            "density_index": format!("{:.1}%", density),
            "status": if self.since.is_some() { "CONGESTED" } else { "FLUID" },
        })
    }

    fn reset(&mut self) {
        self.vehicle_count = 0;
        self.since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;
    use image::RgbImage;
    use std::time::Duration;

    fn cars(n: u64) -> Vec<Track> {
        (1..=n)
            .map(|i| {
                let x = i as f32 * 50.0;
                Track::new(i, "car", BBox::new(x, 0.0, x + 40.0, 30.0), 0.8)
            })
            .collect()
    }

    #[test]
    fn one_warning_per_delay_window() {
        let image = RgbImage::new(16, 16);
        let mut engine = CongestionEngine::new(CongestionConfig::default());
        let t0 = Instant::now();
        let mut tracks = cars(6);

        let mut warnings = Vec::new();
        // 25 s at 10 frames per second with the condition unchanged.
        for step in 0..=250u64 {
            let now = t0 + Duration::from_millis(step * 100);
            let events = engine
                .process_frame(&FrameContext::new(&image, now), &mut tracks)
                .unwrap();
            for event in events {
                assert_eq!(event.severity, Severity::Warning);
                warnings.push(step);
            }
        }
        // First warning just after 10 s, next just after 20 s.
        assert_eq!(warnings, vec![101, 202]);
    }

    #[test]
    fn dropping_below_threshold_restarts_the_timer() {
        let image = RgbImage::new(16, 16);
        let mut engine = CongestionEngine::new(CongestionConfig::default());
        let t0 = Instant::now();
        let mut busy = cars(5);
        let mut quiet = cars(4);

        let at = |secs: u64| t0 + Duration::from_secs(secs);
        assert!(engine.process_frame(&FrameContext::new(&image, at(0)), &mut busy).unwrap().is_empty());
        assert!(engine.process_frame(&FrameContext::new(&image, at(8)), &mut quiet).unwrap().is_empty());
        assert_eq!(engine.status()["status"], "FLUID");
        assert!(engine.process_frame(&FrameContext::new(&image, at(9)), &mut busy).unwrap().is_empty());
        assert!(engine.process_frame(&FrameContext::new(&image, at(15)), &mut busy).unwrap().is_empty());
        assert_eq!(
            engine.process_frame(&FrameContext::new(&image, at(20)), &mut busy).unwrap().len(),
            1
        );
    }

    #[test]
    fn people_do_not_count() {
        let image = RgbImage::new(16, 16);
        let mut engine = CongestionEngine::new(CongestionConfig {
            threshold: 1,
            delay_secs: 0.0,
        });
        let t0 = Instant::now();
        let mut people = vec![Track::new(1, "person", BBox::new(0.0, 0.0, 1.0, 1.0), 0.9)];
        engine.process_frame(&FrameContext::new(&image, t0), &mut people).unwrap();
        let later = t0 + Duration::from_secs(1);
        assert!(engine
            .process_frame(&FrameContext::new(&image, later), &mut people)
            .unwrap()
            .is_empty());
        assert_eq!(engine.status()["active_vehicles"], 0);
    }
}
