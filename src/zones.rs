//! Spatial zones and disallowed-class rules.
//!
//! Zone presence is decided solely by the track's bbox centroid. A centroid on
//! a polygon edge or vertex is outside.

use std::sync::OnceLock;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::detect::Point;
use crate::track::{Track, TrackStatus};
use crate::{Event, Severity};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Restricted,
    Monitored,
    Transit,
    Safe,
}

/// Coarse object classes zone rules are written against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Person,
    Vehicle,
    Boat,
    Unknown,
}

impl ObjectType {
    pub fn from_label(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "person" => ObjectType::Person,
            "car" | "truck" | "bus" | "motorcycle" | "vehicle" => ObjectType::Vehicle,
            "boat" => ObjectType::Boat,
            _ => ObjectType::Unknown,
        }
    }
}

fn default_active() -> bool {
    true
}

fn default_disallowed() -> Vec<ObjectType> {
    vec![ObjectType::Person]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ZoneType,
    /// Absolute display-resolution pixel coordinates.
    pub polygon: Vec<Point>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_disallowed")]
    pub disallowed_types: Vec<ObjectType>,
}

impl Zone {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ZoneType,
        polygon: Vec<Point>,
    ) -> Result<Self> {
        let zone = Self {
            id: id.into(),
            name: name.into(),
            kind,
            polygon,
            active: true,
            disallowed_types: default_disallowed(),
        };
        zone.validate()?;
        Ok(zone)
    }

    pub fn with_disallowed(mut self, disallowed: Vec<ObjectType>) -> Self {
        self.disallowed_types = disallowed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_zone_id(&self.id)?;
        if self.polygon.len() < 3 {
            bail!(
                "zone {} polygon needs at least 3 points, got {}",
                self.id,
                self.polygon.len()
            );
        }
        if self
            .polygon
            .iter()
            .any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            bail!("zone {} polygon has non-finite coordinates", self.id);
        }
        Ok(())
    }

    /// Strict containment: boundary points are outside.
    pub fn contains(&self, point: Point) -> bool {
        point_in_polygon(point, &self.polygon)
    }

    pub fn disallows(&self, label: &str) -> bool {
        let kind = ObjectType::from_label(label);
        kind != ObjectType::Unknown && self.disallowed_types.contains(&kind)
    }
}

/// Zone ids are short local identifiers: `^[a-z0-9_:-]{1,64}$`.
pub fn validate_zone_id(zone_id: &str) -> Result<()> {
    static ZONE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_ID_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_:-]{1,64}$").unwrap());
    if !re.is_match(zone_id) {
        return Err(anyhow!(
            "zone id {:?} must match ^[a-z0-9_:-]{{1,64}}$",
            zone_id
        ));
    }
    Ok(())
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    const EPS: f32 = 1e-4;
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EPS * (1.0 + a.distance(&b)) {
        return false;
    }
    p.x >= a.x.min(b.x) - EPS
        && p.x <= a.x.max(b.x) + EPS
        && p.y >= a.y.min(b.y) - EPS
        && p.y <= a.y.max(b.y) + EPS
}

/// Even-odd ray cast with an explicit boundary check first.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let n = polygon.len();
    for i in 0..n {
        if on_segment(point, polygon[i], polygon[(i + 1) % n]) {
            return false;
        }
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > point.y) != (pj.y > point.y)
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Configured zones plus the per-frame containment check.
#[derive(Clone, Debug, Default)]
pub struct ZoneEngine {
    zones: Vec<Zone>,
}

impl ZoneEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_zone(&mut self, zone: Zone) -> Result<()> {
        zone.validate()?;
        log::info!("added zone {} ({:?}) {}", zone.id, zone.kind, zone.name);
        self.zones.push(zone);
        Ok(())
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// One event per (track, zone) pair where the track's centroid is strictly
    /// inside an active zone that disallows its class. Coasting tracks are
    /// ignored.
    pub fn check(&self, tracks: &[Track]) -> Vec<Event> {
        let mut events = Vec::new();
        for track in tracks {
            if track.status == TrackStatus::Lost || track.disappeared > 0 {
                continue;
            }
            let centroid = track.centroid();
            for zone in self.zones.iter().filter(|z| z.active) {
                if zone.contains(centroid) && zone.disallows(&track.label) {
                    events.push(intrusion(zone, track));
                }
            }
        }
        events
    }
}

fn intrusion(zone: &Zone, track: &Track) -> Event {
    let severity = if zone.kind == ZoneType::Restricted {
        Severity::Critical
    } else {
        Severity::Warning
    };
    Event::new(
        "zone",
        severity,
        format!("Intrusion Detected: {}", track.label.to_uppercase()),
        format!("{} detected in {}", track.label, zone.name),
    )
    .with_zone(zone.id.clone())
    .with_track(track.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;

    fn square(id: &str, kind: ZoneType) -> Zone {
        Zone::new(
            id,
            "Loading Dock",
            kind,
            vec![
                Point::new(100.0, 100.0),
                Point::new(300.0, 100.0),
                Point::new(300.0, 300.0),
                Point::new(100.0, 300.0),
            ],
        )
        .unwrap()
    }

    fn track_at(id: u64, label: &str, cx: f32, cy: f32) -> Track {
        Track::new(
            id,
            label,
            BBox::new(cx - 10.0, cy - 20.0, cx + 10.0, cy + 20.0),
            0.9,
        )
    }

    #[test]
    fn boundary_points_are_outside() {
        let zone = square("dock", ZoneType::Restricted);
        assert!(zone.contains(Point::new(200.0, 200.0)));
        assert!(!zone.contains(Point::new(100.0, 200.0)));
        assert!(!zone.contains(Point::new(300.0, 300.0)));
        assert!(!zone.contains(Point::new(200.0, 100.0)));
        assert!(!zone.contains(Point::new(350.0, 200.0)));
    }

    #[test]
    fn restricted_zone_raises_critical_event_per_track() {
        let mut engine = ZoneEngine::new();
        engine.add_zone(square("dock", ZoneType::Restricted)).unwrap();
        let tracks = vec![
            track_at(1, "person", 200.0, 200.0),
            track_at(2, "person", 500.0, 500.0),
            track_at(3, "person", 100.0, 150.0),
        ];
        let events = engine.check(&tracks);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.title, "Intrusion Detected: PERSON");
        assert_eq!(event.description, "person detected in Loading Dock");
        assert_eq!(event.zone_id.as_deref(), Some("dock"));
        assert_eq!(event.track_id, Some(1));
    }

    #[test]
    fn overlapping_zones_each_report() {
        let mut engine = ZoneEngine::new();
        engine.add_zone(square("a", ZoneType::Restricted)).unwrap();
        engine
            .add_zone(
                square("b", ZoneType::Monitored)
                    .with_disallowed(vec![ObjectType::Person, ObjectType::Vehicle]),
            )
            .unwrap();
        let events = engine.check(&[track_at(1, "truck", 200.0, 200.0)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);

        let events = engine.check(&[track_at(1, "person", 200.0, 200.0)]);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn inactive_zones_and_unknown_classes_are_ignored() {
        let mut zone = square("dock", ZoneType::Restricted);
        zone.active = false;
        let mut engine = ZoneEngine::new();
        engine.add_zone(zone).unwrap();
        engine
            .add_zone(square("yard", ZoneType::Safe).with_disallowed(vec![ObjectType::Vehicle]))
            .unwrap();
        assert!(engine.check(&[track_at(1, "person", 200.0, 200.0)]).is_empty());
        assert!(engine.check(&[track_at(2, "dog", 200.0, 200.0)]).is_empty());
        assert_eq!(engine.check(&[track_at(3, "bus", 200.0, 200.0)]).len(), 1);
    }

    #[test]
    fn invalid_zones_are_rejected() {
        assert!(Zone::new("dock", "x", ZoneType::Safe, vec![Point::new(0.0, 0.0)]).is_err());
        let square_points = square("ok", ZoneType::Safe).polygon;
        assert!(Zone::new("Bad Zone", "x", ZoneType::Safe, square_points).is_err());
    }

    #[test]
    fn label_normalisation() {
        assert_eq!(ObjectType::from_label("Car"), ObjectType::Vehicle);
        assert_eq!(ObjectType::from_label("motorcycle"), ObjectType::Vehicle);
        assert_eq!(ObjectType::from_label("boat"), ObjectType::Boat);
        assert_eq!(ObjectType::from_label("oil_drum"), ObjectType::Unknown);
    }
}
