use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::track::{Track, TrackStatus};

/// Entries not refreshed by the latest update are reported as lost this long.
pub const COAST_SECS: f64 = 1.0;
/// Entries unseen for longer than this are dropped, unless the associator
/// still holds their id.
pub const REMOVE_AFTER_SECS: f64 = 5.0;

const CONFIDENCE_WINDOW: usize = 10;
const LOCK_STEP: f32 = 0.05;
const LOCK_AFTER_DETECTIONS: u32 = 3;
const LOCKED_AT: f32 = 0.7;
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);

struct Identity {
    persistent_id: String,
    status: TrackStatus,
    last_seen: Instant,
    detection_count: u32,
    confidences: VecDeque<f32>,
    avg_confidence: f32,
    lock_strength: f32,
    last_announced: Option<Instant>,
    /// Latest view of the track, kept for coasting snapshots.
    last_track: Track,
}

/// Durable identities keyed by associator id.
///
/// Persistent ids are `{class}{NNN}` with a per-class counter that only grows.
/// Lock strength never decreases for a live entry.
#[derive(Default)]
pub struct IdentityRegistry {
    entries: HashMap<u64, Identity>,
    class_counters: HashMap<String, u32>,
    /// Associator ids refreshed by the most recent `observe` call.
    refreshed: Vec<u64>,
    /// Every id the associator held at the most recent `observe` call,
    /// coasting ones included.
    held: HashSet<u64>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn persistent_id(&self, id: u64) -> Option<&str> {
        self.entries.get(&id).map(|e| e.persistent_id.as_str())
    }

    pub fn lock_strength(&self, id: u64) -> Option<f32> {
        self.entries.get(&id).map(|e| e.lock_strength)
    }

    /// Register or refresh every track seen in this detection cycle and stamp
    /// identity fields onto it. Tracks the associator is coasting
    /// (`disappeared > 0`) keep their last registry state and are not counted
    /// as a new detection.
    pub fn observe(&mut self, tracks: &mut [Track], now: Instant) {
        self.refreshed.clear();
        self.held.clear();
        for track in tracks.iter_mut() {
            self.held.insert(track.id);
            if track.disappeared > 0 {
                if let Some(entry) = self.entries.get(&track.id) {
                    stamp(track, entry);
                }
                continue;
            }
            self.refreshed.push(track.id);
            match self.entries.get_mut(&track.id) {
                Some(entry) => {
                    entry.refresh(track, now);
                    stamp(track, entry);
                }
                None => {
                    let class = track.label.to_lowercase();
                    let counter = self.class_counters.entry(class.clone()).or_insert(0);
                    *counter += 1;
                    let entry = Identity::new(format!("{}{:03}", class, counter), track, now);
                    log::info!("identity {} assigned to track {}", entry.persistent_id, track.id);
                    stamp(track, &entry);
                    self.entries.insert(track.id, entry);
                }
            }
        }
    }

    /// Store the final per-frame view of the tracks (engine actions, status)
    /// so coasting snapshots show what was last rendered.
    pub fn remember(&mut self, tracks: &[Track]) {
        for track in tracks {
            if let Some(entry) = self.entries.get_mut(&track.id) {
                entry.last_track = track.clone();
            }
        }
    }

    /// Tracks to report: every entry seen within `COAST_SECS`, with entries
    /// not refreshed by the latest `observe` marked lost.
    pub fn snapshot(&self, now: Instant) -> Vec<Track> {
        let mut out: Vec<Track> = self
            .entries
            .iter()
            .filter(|(_, e)| age_secs(e.last_seen, now) < COAST_SECS)
            .map(|(id, e)| {
                let mut track = e.last_track.clone();
                stamp(&mut track, e);
                if !self.refreshed.contains(id) {
                    track.status = TrackStatus::Lost;
                } else if e.last_track.status == TrackStatus::Suspicious {
                    track.status = TrackStatus::Suspicious;
                }
                track
            })
            .collect();
        out.sort_by_key(|t| t.id);
        out
    }

    /// Drop entries unseen for more than `REMOVE_AFTER_SECS` whose id the
    /// associator has let go of. An id the associator still holds keeps its
    /// identity and lock strength however long it coasts.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let held = &self.held;
        self.entries.retain(|id, e| {
            held.contains(id) || age_secs(e.last_seen, now) <= REMOVE_AFTER_SECS
        });
        before - self.entries.len()
    }

    /// Announcement gate: at most one announcement per id every 30 s, never
    /// for locked identities.
    pub fn should_announce(&mut self, id: u64, now: Instant) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        if entry.status == TrackStatus::Locked {
            return false;
        }
        if let Some(last) = entry.last_announced {
            if now.saturating_duration_since(last) < ANNOUNCE_INTERVAL {
                return false;
            }
        }
        entry.last_announced = Some(now);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.refreshed.clear();
        self.held.clear();
    }
}

impl Identity {
    fn new(persistent_id: String, track: &Track, now: Instant) -> Self {
        let mut confidences = VecDeque::with_capacity(CONFIDENCE_WINDOW);
        confidences.push_back(track.confidence);
        Self {
            persistent_id,
            status: TrackStatus::Active,
            last_seen: now,
            detection_count: 1,
            confidences,
            avg_confidence: track.confidence,
            lock_strength: 0.0,
            last_announced: None,
            last_track: track.clone(),
        }
    }

    fn refresh(&mut self, track: &Track, now: Instant) {
        if self.confidences.len() == CONFIDENCE_WINDOW {
            self.confidences.pop_front();
        }
        self.confidences.push_back(track.confidence);
        self.avg_confidence = self.confidences.iter().sum::<f32>() / self.confidences.len() as f32;
        self.last_seen = now;
        self.detection_count += 1;
        self.last_track = track.clone();

        if self.detection_count > LOCK_AFTER_DETECTIONS {
            self.lock_strength = (self.lock_strength + LOCK_STEP).min(1.0);
            if self.lock_strength > LOCKED_AT && self.status != TrackStatus::Locked {
                self.status = TrackStatus::Locked;
                log::info!("identity {} locked", self.persistent_id);
            }
        }
    }
}

fn stamp(track: &mut Track, entry: &Identity) {
    track.persistent_id = Some(entry.persistent_id.clone());
    track.status = entry.status;
    track.lock_strength = entry.lock_strength;
    track.detection_count = entry.detection_count;
    track.avg_confidence = entry.avg_confidence;
}

fn age_secs(since: Instant, now: Instant) -> f64 {
    now.saturating_duration_since(since).as_secs_f64()
}
