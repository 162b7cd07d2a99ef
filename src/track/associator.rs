use std::collections::{BTreeMap, VecDeque};

use crate::detect::{BBox, Detection, Keypoint, Point};
use crate::track::Track;

pub const DEFAULT_MAX_DISAPPEARED: u32 = 40;
pub const DEFAULT_MAX_DISTANCE: f32 = 200.0;
const HISTORY_LEN: usize = 20;

struct TrackedObject {
    centroid: Point,
    bbox: BBox,
    label: String,
    confidence: f32,
    keypoints: Option<Vec<Keypoint>>,
    disappeared: u32,
    history: VecDeque<Point>,
    velocity: Option<Point>,
}

impl TrackedObject {
    fn from_detection(detection: &Detection) -> Self {
        let centroid = detection.bbox.centroid();
        let mut history = VecDeque::with_capacity(HISTORY_LEN);
        history.push_back(centroid);
        Self {
            centroid,
            bbox: detection.bbox,
            label: detection.label.clone(),
            confidence: detection.confidence,
            keypoints: detection.keypoints.clone(),
            disappeared: 0,
            history,
            velocity: None,
        }
    }

    fn refresh(&mut self, detection: &Detection) {
        let centroid = detection.bbox.centroid();
        self.velocity = Some(Point::new(
            centroid.x - self.centroid.x,
            centroid.y - self.centroid.y,
        ));
        self.centroid = centroid;
        self.bbox = detection.bbox;
        self.label = detection.label.clone();
        self.confidence = detection.confidence;
        self.keypoints = detection.keypoints.clone();
        self.disappeared = 0;
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(centroid);
    }

    fn to_track(&self, id: u64) -> Track {
        let mut track = Track::new(id, self.label.clone(), self.bbox, self.confidence);
        track.velocity = self.velocity;
        track.history = self.history.iter().copied().collect();
        track.keypoints = self.keypoints.clone();
        track.disappeared = self.disappeared;
        track
    }
}

/// Nearest-centroid associator.
///
/// Ids are allocated from 1 and never reused. An id is deregistered on the
/// update where its disappearance count first exceeds `max_disappeared`.
pub struct CentroidAssociator {
    next_id: u64,
    objects: BTreeMap<u64, TrackedObject>,
    max_disappeared: u32,
    max_distance: f32,
}

impl CentroidAssociator {
    pub fn new(max_disappeared: u32, max_distance: f32) -> Self {
        Self {
            next_id: 1,
            objects: BTreeMap::new(),
            max_disappeared,
            max_distance,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn disappeared(&self, id: u64) -> Option<u32> {
        self.objects.get(&id).map(|o| o.disappeared)
    }

    /// Drop every id; the id counter keeps counting.
    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// Associate one frame's detections and return every live track in id order.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<Track> {
        if detections.is_empty() {
            let ids: Vec<u64> = self.objects.keys().copied().collect();
            for id in ids {
                self.mark_missing(id);
            }
            return self.tracks();
        }

        if self.objects.is_empty() {
            for detection in detections {
                self.register(detection);
            }
            return self.tracks();
        }

        let ids: Vec<u64> = self.objects.keys().copied().collect();
        let centroids: Vec<Point> = detections.iter().map(|d| d.bbox.centroid()).collect();
        let distances: Vec<Vec<f32>> = ids
            .iter()
            .map(|id| {
                let existing = self.objects[id].centroid;
                centroids.iter().map(|c| existing.distance(c)).collect()
            })
            .collect();

        let mut rows: Vec<usize> = (0..ids.len()).collect();
        rows.sort_by(|&a, &b| row_min(&distances[a]).total_cmp(&row_min(&distances[b])));

        let mut used_cols = vec![false; detections.len()];
        let mut matched_rows = vec![false; ids.len()];
        for row in rows {
            let best = distances[row]
                .iter()
                .enumerate()
                .filter(|(col, _)| !used_cols[*col])
                .min_by(|a, b| a.1.total_cmp(b.1));
            let Some((col, &distance)) = best else {
                continue;
            };
            if distance > self.max_distance {
                continue;
            }
            if let Some(object) = self.objects.get_mut(&ids[row]) {
                object.refresh(&detections[col]);
            }
            used_cols[col] = true;
            matched_rows[row] = true;
        }

        for (row, id) in ids.iter().enumerate() {
            if !matched_rows[row] {
                self.mark_missing(*id);
            }
        }
        for (col, detection) in detections.iter().enumerate() {
            if !used_cols[col] {
                self.register(detection);
            }
        }

        self.tracks()
    }

    fn register(&mut self, detection: &Detection) {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, TrackedObject::from_detection(detection));
        log::debug!("registered track {} ({})", id, detection.label);
    }

    fn mark_missing(&mut self, id: u64) {
        let Some(object) = self.objects.get_mut(&id) else {
            return;
        };
        object.disappeared += 1;
        if object.disappeared > self.max_disappeared {
            self.objects.remove(&id);
            log::debug!("deregistered track {}", id);
        }
    }

    fn tracks(&self) -> Vec<Track> {
        self.objects
            .iter()
            .map(|(id, object)| object.to_track(*id))
            .collect()
    }
}

impl Default for CentroidAssociator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DISAPPEARED, DEFAULT_MAX_DISTANCE)
    }
}

fn row_min(row: &[f32]) -> f32 {
    row.iter().copied().fold(f32::INFINITY, f32::min)
}
