#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectionProvider};
use crate::detect::result::{BBox, Detection, Keypoint};
use crate::detect::tiling::suppress_overlaps;

const NMS_IOU: f32 = 0.45;
/// Output channels of a single-class YOLOv8 pose head: 4 box + 1 score + 17 * 3 keypoints.
const POSE_CHANNELS: usize = 56;
const POSE_KEYPOINTS: usize = 17;

const COCO_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Tract-based YOLOv8 provider for ONNX detect and pose models.
///
/// The model is loaded from a local file; inference runs on a square RGB input
/// and boxes are mapped back into the region's pixel space.
pub struct TractProvider {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    pose: bool,
}

impl TractProvider {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let pose = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| stem.ends_with("-pose"));

        Ok(Self {
            model,
            input_size,
            pose,
        })
    }

    fn build_input(&self, region: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(region, size, size, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        confidence: f32,
        sx: f32,
        sy: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[1] < 5 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let channels = shape[1];
        let anchors = shape[2];
        let pose = self.pose || channels == POSE_CHANNELS;

        let mut detections = Vec::new();
        for a in 0..anchors {
            let (label, score) = if pose {
                ("person", view[[0, 4, a]])
            } else {
                let mut best = (0usize, f32::MIN);
                for c in 4..channels {
                    let s = view[[0, c, a]];
                    if s > best.1 {
                        best = (c - 4, s);
                    }
                }
                (COCO_NAMES.get(best.0).copied().unwrap_or("object"), best.1)
            };
            if score < confidence {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, a]],
                view[[0, 1, a]],
                view[[0, 2, a]],
                view[[0, 3, a]],
            );
            let bbox = BBox::new(
                (cx - w / 2.0) * sx,
                (cy - h / 2.0) * sy,
                (cx + w / 2.0) * sx,
                (cy + h / 2.0) * sy,
            );
            let mut detection = Detection::new(bbox, label, score);
            if pose && channels >= 5 + POSE_KEYPOINTS * 3 {
                let keypoints = (0..POSE_KEYPOINTS)
                    .map(|k| {
                        let base = 5 + k * 3;
                        Keypoint::new(
                            view[[0, base, a]] * sx,
                            view[[0, base + 1, a]] * sy,
                            view[[0, base + 2, a]],
                        )
                    })
                    .collect();
                detection = detection.with_keypoints(keypoints);
            }
            detections.push(detection);
        }

        Ok(suppress_overlaps(detections, NMS_IOU))
    }
}

impl DetectionProvider for TractProvider {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        match capability {
            DetectionCapability::ObjectDetection => true,
            DetectionCapability::Pose => self.pose,
            _ => false,
        }
    }

    fn detect(&mut self, region: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        if region.width() == 0 || region.height() == 0 {
            return Ok(Vec::new());
        }
        let input = self.build_input(region);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let sx = region.width() as f32 / self.input_size as f32;
        let sy = region.height() as f32 / self.input_size as f32;
        self.decode(outputs, confidence, sx, sy)
    }
}
