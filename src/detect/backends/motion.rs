use std::collections::BTreeMap;

use anyhow::Result;
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::detect::backend::{DetectionCapability, DetectionProvider};
use crate::detect::result::{BBox, Detection};

const DEFAULT_LEARNING_RATE: f32 = 0.05;
const DEFAULT_DIFF_THRESHOLD: f32 = 25.0;
const DEFAULT_MIN_AREA: u32 = 500;
const BLOB_LABEL: &str = "vehicle";
const BLOB_CONFIDENCE: f32 = 0.5;

/// Background-subtraction motion detector.
///
/// Keeps a running-average grayscale background, thresholds the absolute
/// difference, cleans the mask with a 5x5 open/close and reports every
/// connected blob larger than `min_area` pixels. This is the per-cycle
/// fallback when the primary provider fails.
pub struct MotionDetector {
    background: Option<Vec<f32>>,
    dims: (u32, u32),
    learning_rate: f32,
    diff_threshold: f32,
    min_area: u32,
}

impl MotionDetector {
    pub fn new() -> Self {
        Self {
            background: None,
            dims: (0, 0),
            learning_rate: DEFAULT_LEARNING_RATE,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
        }
    }

    pub fn with_min_area(mut self, min_area: u32) -> Self {
        self.min_area = min_area;
        self
    }

    fn foreground_mask(&mut self, gray: &GrayImage) -> Option<GrayImage> {
        let dims = gray.dimensions();
        let background = match self.background.as_mut() {
            Some(bg) if self.dims == dims => bg,
            _ => {
                self.background = Some(gray.as_raw().iter().map(|&p| p as f32).collect());
                self.dims = dims;
                return None;
            }
        };

        let mut mask = GrayImage::new(dims.0, dims.1);
        for ((bg, &p), out) in background
            .iter_mut()
            .zip(gray.as_raw().iter())
            .zip(mask.iter_mut())
        {
            let value = p as f32;
            if (value - *bg).abs() > self.diff_threshold {
                *out = 255;
            }
            *bg += (value - *bg) * self.learning_rate;
        }
        Some(mask)
    }

    fn blobs(&self, mask: &GrayImage) -> Vec<Detection> {
        let cleaned = close(&open(mask, Norm::LInf, 2), Norm::LInf, 2);
        let labels = connected_components(&cleaned, Connectivity::Eight, Luma([0u8]));

        // label -> (min_x, min_y, max_x, max_y, pixel count)
        let mut extents: BTreeMap<u32, (u32, u32, u32, u32, u32)> = BTreeMap::new();
        for (x, y, pixel) in labels.enumerate_pixels() {
            let label = pixel[0];
            if label == 0 {
                continue;
            }
            let entry = extents.entry(label).or_insert((x, y, x, y, 0));
            entry.0 = entry.0.min(x);
            entry.1 = entry.1.min(y);
            entry.2 = entry.2.max(x);
            entry.3 = entry.3.max(y);
            entry.4 += 1;
        }

        extents
            .values()
            .filter(|(_, _, _, _, area)| *area > self.min_area)
            .map(|&(x1, y1, x2, y2, _)| {
                Detection::new(
                    BBox::new(x1 as f32, y1 as f32, (x2 + 1) as f32, (y2 + 1) as f32),
                    BLOB_LABEL,
                    BLOB_CONFIDENCE,
                )
            })
            .collect()
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionProvider for MotionDetector {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::Motion)
    }

    fn detect(&mut self, region: &RgbImage, _confidence: f32) -> Result<Vec<Detection>> {
        let gray = image::imageops::grayscale(region);
        match self.foreground_mask(&gray) {
            Some(mask) => Ok(self.blobs(&mask)),
            None => Ok(Vec::new()),
        }
    }
}
