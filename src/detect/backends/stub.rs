use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{DetectionCapability, DetectionProvider};
use crate::detect::result::Detection;

enum ScriptStep {
    Detections(Vec<Detection>),
    Failure(String),
}

/// Scripted provider for tests and demos.
///
/// Each `detect` call consumes one scripted step. When the script runs out the
/// last successful response is repeated, so a scene can be held steady.
pub struct ScriptedProvider {
    script: VecDeque<ScriptStep>,
    last: Vec<Detection>,
    pose: bool,
    calls: u64,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            last: Vec::new(),
            pose: false,
            calls: 0,
        }
    }

    /// Advertise pose support (keypoints in scripted detections are passed through).
    pub fn with_pose(mut self) -> Self {
        self.pose = true;
        self
    }

    pub fn then(mut self, detections: Vec<Detection>) -> Self {
        self.script.push_back(ScriptStep::Detections(detections));
        self
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push_back(ScriptStep::Failure(message.to_string()));
        self
    }

    pub fn push(&mut self, detections: Vec<Detection>) {
        self.script.push_back(ScriptStep::Detections(detections));
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        match capability {
            DetectionCapability::ObjectDetection => true,
            DetectionCapability::Pose => self.pose,
            _ => false,
        }
    }

    fn detect(&mut self, _region: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(ScriptStep::Detections(detections)) => self.last = detections,
            Some(ScriptStep::Failure(message)) => return Err(anyhow!(message)),
            None => {}
        }
        Ok(self
            .last
            .iter()
            .filter(|d| d.confidence >= confidence)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BBox;

    #[test]
    fn scripted_provider_replays_then_holds() {
        let person = Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), "person", 0.9);
        let faint = Detection::new(BBox::new(20.0, 0.0, 30.0, 10.0), "car", 0.1);
        let mut provider = ScriptedProvider::new()
            .then(vec![person.clone(), faint])
            .then_fail("model crashed");
        let frame = RgbImage::new(4, 4);

        let r1 = provider.detect(&frame, 0.3).unwrap();
        assert_eq!(r1, vec![person.clone()]);
        assert!(provider.detect(&frame, 0.3).is_err());
        let r3 = provider.detect(&frame, 0.3).unwrap();
        assert_eq!(r3, vec![person]);
        assert_eq!(provider.calls(), 3);
    }
}
