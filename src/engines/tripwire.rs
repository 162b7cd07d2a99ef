use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::detect::Point;
use crate::engines::{BehaviorEngine, FrameContext};
use crate::track::Track;
use crate::zones::validate_zone_id;
use crate::{Event, Severity};

/// A virtual line in normalised frame coordinates ([0,1] on both axes).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tripwire {
    pub id: String,
    pub p1: Point,
    pub p2: Point,
}

impl Tripwire {
    pub fn new(id: impl Into<String>, p1: Point, p2: Point) -> Result<Self> {
        let wire = Self {
            id: id.into(),
            p1,
            p2,
        };
        wire.validate()?;
        Ok(wire)
    }

    pub fn validate(&self) -> Result<()> {
        validate_zone_id(&self.id)?;
        for p in [self.p1, self.p2] {
            if !(0.0..=1.0).contains(&p.x) || !(0.0..=1.0).contains(&p.y) {
                bail!("tripwire {} coordinates must lie in [0,1]", self.id);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TripwireConfig {
    pub wires: Vec<Tripwire>,
    pub classes: Vec<String>,
    pub history_len: usize,
    pub cooldown_secs: f64,
}

impl Default for TripwireConfig {
    fn default() -> Self {
        Self {
            wires: vec![Tripwire {
                id: "driveway_1".to_string(),
                p1: Point::new(0.2, 0.7),
                p2: Point::new(0.8, 0.7),
            }],
            classes: vec!["person".into(), "car".into(), "truck".into()],
            history_len: 5,
            cooldown_secs: 10.0,
        }
    }
}

fn ccw(a: Point, b: Point, c: Point) -> bool {
    (c.y - a.y) * (b.x - a.x) > (b.y - a.y) * (c.x - a.x)
}

/// Proper intersection of segment AB with segment CD.
pub fn segments_cross(a: Point, b: Point, c: Point, d: Point) -> bool {
    ccw(a, c, d) != ccw(b, c, d) && ccw(a, b, c) != ccw(a, b, d)
}

/// Perimeter breach detection across configured tripwires.
pub struct TripwireEngine {
    config: TripwireConfig,
    history: HashMap<u64, VecDeque<Point>>,
    last_breach: HashMap<(u64, String), Instant>,
    breaches: u64,
}

impl TripwireEngine {
    pub fn new(config: TripwireConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
            last_breach: HashMap::new(),
            breaches: 0,
        }
    }

    pub fn wires(&self) -> &[Tripwire] {
        &self.config.wires
    }

    fn watches(&self, track: &Track) -> bool {
        self.config.classes.iter().any(|c| track.is(c))
    }
}

impl BehaviorEngine for TripwireEngine {
    fn name(&self) -> &'static str {
        "perimeter"
    }

    fn process_frame(&mut self, ctx: &FrameContext<'_>, tracks: &mut [Track]) -> Result<Vec<Event>> {
        let (w, h) = (ctx.width().max(1) as f32, ctx.height().max(1) as f32);
        let cooldown = Duration::from_secs_f64(self.config.cooldown_secs);
        let history_len = self.config.history_len.max(2);
        let mut events = Vec::new();

        let classes = &self.config.classes;
        for track in tracks.iter().filter(|t| classes.iter().any(|c| t.is(c))) {
            let c = track.centroid();
            let history = self.history.entry(track.id).or_default();
            if history.len() == history_len {
                history.pop_front();
            }
            history.push_back(Point::new(c.x / w, c.y / h));
            if history.len() < 2 {
                continue;
            }
            let prev = history[history.len() - 2];
            let curr = history[history.len() - 1];

            for wire in &self.config.wires {
                if !segments_cross(prev, curr, wire.p1, wire.p2) {
                    continue;
                }
                let key = (track.id, wire.id.clone());
                if let Some(last) = self.last_breach.get(&key) {
                    if ctx.now.saturating_duration_since(*last) <= cooldown {
                        continue;
                    }
                }
                self.last_breach.insert(key, ctx.now);
                self.breaches += 1;
                log::warn!("{} crossed tripwire {}", track.display_name(), wire.id);
                events.push(
                    Event::new(
                        "breach",
                        Severity::Critical,
                        "Perimeter Breach Detected",
                        format!("{} crossed {}.", title_case(&track.label), wire.id),
                    )
                    .with_track(track.id)
                    .with_metadata(serde_json::json!({ "zone": wire.id })),
                );
            }
        }

        let active: HashSet<u64> = tracks
            .iter()
            .filter(|t| self.watches(t))
            .map(|t| t.id)
            .collect();
        self.history.retain(|id, _| active.contains(id));
        self.last_breach
            .retain(|_, last| ctx.now.saturating_duration_since(*last) <= cooldown);
        Ok(events)
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "active_tripwires": self.config.wires.len(),
            "breach_events": self.breaches,
        })
    }

    fn reset(&mut self) {
        self.history.clear();
        self.last_breach.clear();
        self.breaches = 0;
    }
}

fn title_case(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;
    use image::RgbImage;

    /// 1000x1000 frame so normalised and pixel coordinates line up by /1000.
    fn frame() -> RgbImage {
        RgbImage::new(1000, 1000)
    }

    fn at(id: u64, label: &str, cx: f32, cy: f32) -> Track {
        Track::new(id, label, BBox::new(cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0), 0.9)
    }

    #[test]
    fn crossing_fires_once_within_cooldown() {
        let image = frame();
        let mut engine = TripwireEngine::new(TripwireConfig::default());
        let t0 = Instant::now();
        let mut run = |secs: u64, y: f32| {
            engine
                .process_frame(
                    &FrameContext::new(&image, t0 + Duration::from_secs(secs)),
                    &mut [at(1, "person", 500.0, y)],
                )
                .unwrap()
        };

        assert!(run(0, 650.0).is_empty());
        let events = run(1, 750.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Perimeter Breach Detected");
        assert_eq!(events[0].description, "Person crossed driveway_1.");
        assert_eq!(events[0].metadata.as_ref().unwrap()["zone"], "driveway_1");

        // Back across inside the cooldown: suppressed.
        assert!(run(5, 650.0).is_empty());
        // And again once the cooldown has passed.
        assert_eq!(run(12, 750.0).len(), 1);
    }

    #[test]
    fn movement_parallel_or_beside_the_wire_is_ignored() {
        let image = frame();
        let mut engine = TripwireEngine::new(TripwireConfig::default());
        let t0 = Instant::now();
        for (step, (x, y)) in [(300.0, 650.0), (700.0, 650.0), (900.0, 650.0), (900.0, 800.0)]
            .into_iter()
            .enumerate()
        {
            let events = engine
                .process_frame(
                    &FrameContext::new(&image, t0 + Duration::from_secs(step as u64)),
                    &mut [at(1, "car", x, y)],
                )
                .unwrap();
            assert!(events.is_empty(), "step {}", step);
        }
    }

    #[test]
    fn unwatched_classes_never_breach() {
        let image = frame();
        let mut engine = TripwireEngine::new(TripwireConfig::default());
        let t0 = Instant::now();
        engine
            .process_frame(&FrameContext::new(&image, t0), &mut [at(1, "dog", 500.0, 650.0)])
            .unwrap();
        let events = engine
            .process_frame(
                &FrameContext::new(&image, t0 + Duration::from_secs(1)),
                &mut [at(1, "dog", 500.0, 750.0)],
            )
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(engine.status()["active_tripwires"], 1);
    }

    #[test]
    fn wires_outside_unit_square_are_rejected() {
        assert!(Tripwire::new("gate", Point::new(0.1, 0.5), Point::new(1.2, 0.5)).is_err());
        assert!(Tripwire::new("gate", Point::new(0.1, 0.5), Point::new(0.9, 0.5)).is_ok());
    }
}
