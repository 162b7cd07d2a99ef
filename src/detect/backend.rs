use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Detection capabilities advertised by providers.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    Motion,
    ObjectDetection,
    Pose,
}

/// Detection provider trait.
///
/// The pipeline treats providers as opaque: one image region in, zero or more
/// detections out, in the region's own pixel coordinates. Providers are
/// stateless per call from the pipeline's point of view; any internal state
/// (model sessions, background models) is the provider's business.
pub trait DetectionProvider: Send {
    /// Provider identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the provider supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on an image region, keeping results at or above `confidence`.
    fn detect(&mut self, region: &RgbImage, confidence: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
