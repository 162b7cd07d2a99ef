//! Tile-and-merge detection.
//!
//! Small objects disappear when a large frame is squeezed into a model's input.
//! `TileDetector` optionally cuts the frame into overlapping tiles, runs the
//! provider on each, maps the boxes back into frame coordinates and removes the
//! duplicates that the overlap produces.

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::Deserialize;

use crate::detect::backend::DetectionProvider;
use crate::detect::result::Detection;

pub const DEFAULT_TILE_SIZE: u32 = 640;
pub const DEFAULT_TILE_OVERLAP: f32 = 0.2;
pub const DEFAULT_MERGE_IOU: f32 = 0.5;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub enabled: bool,
    pub tile_size: u32,
    pub overlap: f32,
    pub iou_threshold: f32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tile_size: DEFAULT_TILE_SIZE,
            overlap: DEFAULT_TILE_OVERLAP,
            iou_threshold: DEFAULT_MERGE_IOU,
        }
    }
}

/// One tile region in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Tile origins along one axis. The last tile is pulled back so it ends on the
/// frame edge; an axis shorter than one tile gets a single origin at 0.
fn axis_origins(len: u32, tile: u32, stride: u32) -> Vec<u32> {
    if len <= tile {
        return vec![0];
    }
    let mut origins = Vec::new();
    let mut start = 0u32;
    loop {
        let clamped = start.min(len - tile);
        if origins.last() != Some(&clamped) {
            origins.push(clamped);
        }
        if clamped + tile >= len {
            break;
        }
        start += stride;
    }
    origins
}

/// Scan rows then columns and produce the tiles covering a `width` x `height` frame.
pub fn tile_grid(width: u32, height: u32, tile_size: u32, overlap: f32) -> Vec<Tile> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let tile_size = tile_size.max(1);
    let stride = ((tile_size as f32 * (1.0 - overlap)) as u32).max(1);
    let mut tiles = Vec::new();
    for y in axis_origins(height, tile_size, stride) {
        for x in axis_origins(width, tile_size, stride) {
            tiles.push(Tile {
                x,
                y,
                width: tile_size.min(width - x),
                height: tile_size.min(height - y),
            });
        }
    }
    tiles
}

/// Greedy suppression: keep the most confident box, drop every remaining box
/// whose IoU with a kept box reaches `iou_threshold`.
pub fn suppress_overlaps(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

/// Optional tiling wrapper around a detection provider.
#[derive(Clone, Debug, Default)]
pub struct TileDetector {
    config: TilingConfig,
}

impl TileDetector {
    pub fn new(config: TilingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Detect over the whole frame, tiling when enabled.
    ///
    /// With tiling on, a failing tile is logged and skipped; the call only fails
    /// when every tile failed.
    pub fn detect(
        &self,
        provider: &mut dyn DetectionProvider,
        frame: &RgbImage,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        if !self.config.enabled {
            return provider.detect(frame, confidence);
        }

        let tiles = tile_grid(
            frame.width(),
            frame.height(),
            self.config.tile_size,
            self.config.overlap,
        );
        let mut projected = Vec::new();
        let mut failures = 0usize;
        for tile in &tiles {
            let region =
                image::imageops::crop_imm(frame, tile.x, tile.y, tile.width, tile.height).to_image();
            match provider.detect(&region, confidence) {
                Ok(detections) => projected.extend(
                    detections
                        .into_iter()
                        .map(|d| d.offset(tile.x as f32, tile.y as f32)),
                ),
                Err(e) => {
                    failures += 1;
                    log::warn!(
                        "tile {}x{}+{}+{} dropped: {}",
                        tile.width,
                        tile.height,
                        tile.x,
                        tile.y,
                        e
                    );
                }
            }
        }

        if !tiles.is_empty() && failures == tiles.len() {
            return Err(anyhow!("all {} tiles failed detection", tiles.len()));
        }
        Ok(suppress_overlaps(projected, self.config.iou_threshold))
    }
}
