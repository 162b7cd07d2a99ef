//! Retail theft heuristics over pose keypoints.
//!
//! Keypoints use COCO ordering: 0 nose, 5/6 shoulders, 9/10 wrists, 11/12 hips.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Deserialize;

use crate::detect::{Keypoint, Point};
use crate::engines::{BehaviorEngine, FrameContext};
use crate::track::{Track, TrackStatus};
use crate::{Event, Severity};

const NOSE: usize = 0;
const L_SHOULDER: usize = 5;
const R_SHOULDER: usize = 6;
const L_WRIST: usize = 9;
const R_WRIST: usize = 10;
const L_HIP: usize = 11;
const R_HIP: usize = 12;
const MIN_KEYPOINTS: usize = 13;

const HISTORY_LEN: usize = 10;
const STANDING_BELOW: f32 = 2.0;
const NOSE_MIN_CONFIDENCE: f32 = 0.5;

pub const ACTION_STANDING: &str = "Standing";
pub const ACTION_WALKING: &str = "Walking";
pub const ACTION_CONCEALING: &str = "Concealing";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConcealmentConfig {
    /// Keypoints at or below this confidence are ignored.
    pub min_confidence: f32,
    /// Wrist-to-hip distance, as a fraction of torso height.
    pub pocket_factor: f32,
    /// Wrist-to-chest distance, as a fraction of torso height.
    pub chest_factor: f32,
    /// Nose offset from the shoulder midpoint, as a fraction of shoulder width.
    pub head_turn_factor: f32,
    pub cooldown_secs: f64,
}

impl Default for ConcealmentConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.4,
            pocket_factor: 0.45,
            chest_factor: 0.50,
            head_turn_factor: 0.8,
            cooldown_secs: 15.0,
        }
    }
}

pub struct ConcealmentEngine {
    config: ConcealmentConfig,
    history: HashMap<u64, VecDeque<Point>>,
    suspicious: HashSet<u64>,
    last_alert: HashMap<u64, Instant>,
}

impl ConcealmentEngine {
    pub fn new(config: ConcealmentConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
            suspicious: HashSet::new(),
            last_alert: HashMap::new(),
        }
    }

    /// Average displacement per frame over the bounded centroid history.
    fn observe_motion(&mut self, track: &Track) -> f32 {
        let history = self.history.entry(track.id).or_default();
        if history.len() == HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(track.centroid());
        match (history.front(), history.back()) {
            (Some(first), Some(last)) if history.len() >= 2 => {
                first.distance(last) / history.len() as f32
            }
            _ => 0.0,
        }
    }

    fn confident(&self, keypoints: &[Keypoint], index: usize) -> Option<Point> {
        keypoints
            .get(index)
            .filter(|k| k.confidence > self.config.min_confidence)
            .map(Keypoint::point)
    }

    /// True when any concealment heuristic fires. Incomplete or low-confidence
    /// pose data means "not concealing".
    fn is_concealing(&self, keypoints: &[Keypoint], standing: bool) -> bool {
        if keypoints.len() < MIN_KEYPOINTS {
            return false;
        }
        let (Some(l_wrist), Some(r_wrist), Some(l_hip), Some(r_hip), Some(l_sh), Some(r_sh)) = (
            self.confident(keypoints, L_WRIST),
            self.confident(keypoints, R_WRIST),
            self.confident(keypoints, L_HIP),
            self.confident(keypoints, R_HIP),
            self.confident(keypoints, L_SHOULDER),
            self.confident(keypoints, R_SHOULDER),
        ) else {
            return false;
        };

        let mid_hip = l_hip.midpoint(&r_hip);
        let mid_shoulder = l_sh.midpoint(&r_sh);
        let mid_chest = mid_hip.midpoint(&mid_shoulder);
        let torso = mid_shoulder.distance(&mid_hip);
        if !torso.is_finite() || torso <= 0.0 {
            return false;
        }

        let pocket = torso * self.config.pocket_factor;
        let near_pocket = [l_wrist, r_wrist]
            .iter()
            .any(|w| w.distance(&l_hip) < pocket || w.distance(&r_hip) < pocket);

        let chest = torso * self.config.chest_factor;
        let near_chest = [l_wrist, r_wrist]
            .iter()
            .any(|w| w.distance(&mid_chest) < chest);

        let head_turned = standing
            && keypoints
                .get(NOSE)
                .filter(|k| k.confidence > NOSE_MIN_CONFIDENCE)
                .is_some_and(|nose| {
                    (nose.x - mid_shoulder.x).abs()
                        > l_sh.distance(&r_sh) * self.config.head_turn_factor
                });

        near_pocket || near_chest || head_turned
    }

    fn cooldown_elapsed(&mut self, id: u64, now: Instant) -> bool {
        let cooldown = Duration::from_secs_f64(self.config.cooldown_secs);
        match self.last_alert.get(&id) {
            Some(last) if now.saturating_duration_since(*last) <= cooldown => false,
            _ => {
                self.last_alert.insert(id, now);
                true
            }
        }
    }
}

impl BehaviorEngine for ConcealmentEngine {
    fn name(&self) -> &'static str {
        "concealment"
    }

    fn process_frame(&mut self, ctx: &FrameContext<'_>, tracks: &mut [Track]) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for person in tracks.iter_mut().filter(|t| t.is("person")) {
            let speed = self.observe_motion(person);
            let standing = speed < STANDING_BELOW;
            person.action = Some(if standing { ACTION_STANDING } else { ACTION_WALKING }.to_string());

            let concealing = person
                .keypoints
                .as_deref()
                .is_some_and(|k| self.is_concealing(k, standing));

            if concealing {
                person.action = Some(ACTION_CONCEALING.to_string());
                self.suspicious.insert(person.id);
                if self.cooldown_elapsed(person.id, ctx.now) {
                    log::warn!("concealment suspected for {}", person.display_name());
                    events.push(
                        Event::new(
                            "theft",
                            Severity::Critical,
                            "Potential Theft Detected",
                            format!("Subject {} concealing item in pocket.", person.display_name()),
                        )
                        .with_track(person.id)
                        .with_metadata(serde_json::json!({
                            "action": "concealment",
                            "confidence": 0.88,
                        })),
                    );
                }
            }

            if self.suspicious.contains(&person.id) {
                person.status = TrackStatus::Suspicious;
            }
        }

        let active: HashSet<u64> = tracks.iter().filter(|t| t.is("person")).map(|t| t.id).collect();
        self.history.retain(|id, _| active.contains(id));
        self.suspicious.retain(|id| active.contains(id));
        let cooldown = Duration::from_secs_f64(self.config.cooldown_secs);
        self.last_alert
            .retain(|_, last| ctx.now.saturating_duration_since(*last) <= cooldown);
        Ok(events)
    }

    fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "mode": "ACTIVE_THEFT_PREVENTION",
            "active_targets": self.history.len(),
            "suspicious": self.suspicious.len(),
        })
    }

    fn reset(&mut self) {
        self.history.clear();
        self.suspicious.clear();
        self.last_alert.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;
    use image::RgbImage;

    /// Upright figure: shoulders at y=100, hips at y=200 (torso 100 px),
    /// wrists hanging at the sides away from the hips.
    fn pose(l_wrist: (f32, f32), nose_x: f32) -> Vec<Keypoint> {
        let mut k = vec![Keypoint::new(0.0, 0.0, 0.0); 17];
        k[NOSE] = Keypoint::new(nose_x, 70.0, 0.9);
        k[L_SHOULDER] = Keypoint::new(170.0, 100.0, 0.9);
        k[R_SHOULDER] = Keypoint::new(230.0, 100.0, 0.9);
        k[L_WRIST] = Keypoint::new(l_wrist.0, l_wrist.1, 0.9);
        k[R_WRIST] = Keypoint::new(300.0, 150.0, 0.9);
        k[L_HIP] = Keypoint::new(180.0, 200.0, 0.9);
        k[R_HIP] = Keypoint::new(220.0, 200.0, 0.9);
        k
    }

    fn person_with(keypoints: Vec<Keypoint>) -> Track {
        let mut t = Track::new(1, "person", BBox::new(150.0, 50.0, 250.0, 350.0), 0.9);
        t.keypoints = Some(keypoints);
        t
    }

    #[test]
    fn relaxed_pose_is_not_concealing() {
        let engine = ConcealmentEngine::new(ConcealmentConfig::default());
        assert!(!engine.is_concealing(&pose((100.0, 150.0), 200.0), true));
    }

    #[test]
    fn wrist_at_hip_alerts_once_per_cooldown() {
        let image = RgbImage::new(16, 16);
        let mut engine = ConcealmentEngine::new(ConcealmentConfig::default());
        let t0 = Instant::now();
        // Left wrist 30 px from the left hip, under 0.45 * 100.
        let keypoints = pose((180.0, 230.0), 200.0);

        let mut alerts = Vec::new();
        for tenth in 0..=200u64 {
            let now = t0 + Duration::from_millis(tenth * 100);
            let mut tracks = vec![person_with(keypoints.clone())];
            let events = engine
                .process_frame(&FrameContext::new(&image, now), &mut tracks)
                .unwrap();
            assert_eq!(tracks[0].status, TrackStatus::Suspicious);
            assert_eq!(tracks[0].action.as_deref(), Some(ACTION_CONCEALING));
            for event in events {
                assert_eq!(event.severity, Severity::Critical);
                assert_eq!(event.title, "Potential Theft Detected");
                assert_eq!(event.metadata.as_ref().unwrap()["action"], "concealment");
                alerts.push(tenth);
            }
        }
        // First qualifying frame, then nothing until the 15 s cooldown passes.
        assert_eq!(alerts, vec![0, 151]);
    }

    #[test]
    fn wrist_at_chest_counts() {
        let engine = ConcealmentEngine::new(ConcealmentConfig::default());
        // Chest midpoint is (200, 150); wrist 20 px away.
        assert!(engine.is_concealing(&pose((200.0, 170.0), 200.0), false));
    }

    #[test]
    fn head_turn_only_counts_while_standing() {
        let engine = ConcealmentEngine::new(ConcealmentConfig::default());
        // Shoulder width 60, so a nose more than 48 px off-centre is a turn.
        let turned = pose((100.0, 150.0), 260.0);
        assert!(engine.is_concealing(&turned, true));
        assert!(!engine.is_concealing(&turned, false));
    }

    #[test]
    fn low_confidence_or_short_pose_is_skipped() {
        let engine = ConcealmentEngine::new(ConcealmentConfig::default());
        let mut weak = pose((180.0, 230.0), 200.0);
        weak[R_HIP].confidence = 0.3;
        assert!(!engine.is_concealing(&weak, true));

        let short = pose((180.0, 230.0), 200.0)[..12].to_vec();
        assert!(!engine.is_concealing(&short, true));

        let nan = vec![Keypoint::new(f32::NAN, f32::NAN, 0.9); 17];
        assert!(!engine.is_concealing(&nan, true));
    }

    #[test]
    fn walking_is_classified_from_history() {
        let image = RgbImage::new(16, 16);
        let mut engine = ConcealmentEngine::new(ConcealmentConfig::default());
        let t0 = Instant::now();
        let mut last_action = None;
        for step in 0..5u64 {
            let x = step as f32 * 20.0;
            let mut tracks = vec![Track::new(7, "person", BBox::new(x, 0.0, x + 40.0, 80.0), 0.9)];
            engine
                .process_frame(
                    &FrameContext::new(&image, t0 + Duration::from_millis(step * 100)),
                    &mut tracks,
                )
                .unwrap();
            last_action = tracks[0].action.clone();
        }
        // 80 px over 5 samples = 16 px per frame.
        assert_eq!(last_action.as_deref(), Some(ACTION_WALKING));
    }

    #[test]
    fn suspicion_is_forgotten_when_track_leaves() {
        let image = RgbImage::new(16, 16);
        let mut engine = ConcealmentEngine::new(ConcealmentConfig::default());
        let now = Instant::now();
        let mut tracks = vec![person_with(pose((180.0, 230.0), 200.0))];
        engine.process_frame(&FrameContext::new(&image, now), &mut tracks).unwrap();
        assert_eq!(engine.status()["suspicious"], 1);
        engine.process_frame(&FrameContext::new(&image, now), &mut []).unwrap();
        assert_eq!(engine.status()["suspicious"], 0);
        assert_eq!(engine.status()["active_targets"], 0);
    }
}
