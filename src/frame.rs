//! Frame geometry and the shared latest-frame slot.
//!
//! - `FrameViews`: display frame (what is rendered and streamed) plus the
//!   smaller detection proxy and the scale factors between them.
//! - `compose_grid`: 2x2 mosaic for pooled sensors.
//! - `LatestFrame`: JPEG bytes of the last annotated frame, shared with any
//!   number of streaming readers.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::render;

pub const DISPLAY_WIDTH: u32 = 1280;
pub const DISPLAY_HEIGHT: u32 = 720;
pub const PROXY_WIDTH: u32 = 854;
pub const PROXY_HEIGHT: u32 = 480;

pub const GRID_PANEL_WIDTH: u32 = 640;
pub const GRID_PANEL_HEIGHT: u32 = 360;
pub const GRID_MAX_PANELS: usize = 4;

// ----------------------------------------------------------------------------
// FrameViews: display + detection proxy
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

pub struct FrameViews {
    pub display: RgbImage,
    pub proxy: RgbImage,
    /// Multiply proxy coordinates by these to land in display coordinates.
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Resize an acquired frame to the display and proxy resolutions.
pub fn derive_views(frame: &RgbImage, display: Resolution, proxy: Resolution) -> Result<FrameViews> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(anyhow!("cannot derive views from an empty frame"));
    }
    if display.width == 0 || display.height == 0 || proxy.width == 0 || proxy.height == 0 {
        return Err(anyhow!("display and proxy resolutions must be non-zero"));
    }
    let display_img = if frame.dimensions() == (display.width, display.height) {
        frame.clone()
    } else {
        imageops::resize(frame, display.width, display.height, FilterType::Triangle)
    };
    let proxy_img = imageops::resize(&display_img, proxy.width, proxy.height, FilterType::Triangle);
    Ok(FrameViews {
        display: display_img,
        proxy: proxy_img,
        scale_x: display.width as f32 / proxy.width as f32,
        scale_y: display.height as f32 / proxy.height as f32,
    })
}

// ----------------------------------------------------------------------------
// Grid composition
// ----------------------------------------------------------------------------

/// Lay out up to four frames as a 2x2 grid of 640x360 panels. Missing panels
/// stay black.
pub fn compose_grid(frames: &[RgbImage]) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(
        GRID_PANEL_WIDTH * 2,
        GRID_PANEL_HEIGHT * 2,
        Rgb([0, 0, 0]),
    );
    for (i, frame) in frames.iter().take(GRID_MAX_PANELS).enumerate() {
        if frame.width() == 0 || frame.height() == 0 {
            continue;
        }
        let panel = imageops::resize(frame, GRID_PANEL_WIDTH, GRID_PANEL_HEIGHT, FilterType::Triangle);
        let x = (i as u32 % 2) * GRID_PANEL_WIDTH;
        let y = (i as u32 / 2) * GRID_PANEL_HEIGHT;
        imageops::replace(&mut canvas, &panel, x as i64, y as i64);
    }
    canvas
}

// ----------------------------------------------------------------------------
// LatestFrame: shared streaming slot
// ----------------------------------------------------------------------------

/// Latest annotated frame as JPEG. Written by the pipeline worker only.
pub struct LatestFrame {
    jpeg: Mutex<Option<Vec<u8>>>,
    placeholder: Vec<u8>,
}

impl LatestFrame {
    pub fn new(display: Resolution) -> Result<Self> {
        let blank = RgbImage::new(display.width.max(1), display.height.max(1));
        Ok(Self {
            jpeg: Mutex::new(None),
            placeholder: render::encode_jpeg(&blank, render::JPEG_QUALITY)?,
        })
    }

    pub fn store(&self, jpeg: Vec<u8>) -> Result<()> {
        let mut slot = self
            .jpeg
            .lock()
            .map_err(|_| anyhow!("latest frame lock poisoned"))?;
        *slot = Some(jpeg);
        Ok(())
    }

    /// Latest JPEG, or a blank placeholder before the first frame is produced.
    pub fn get(&self) -> Result<Vec<u8>> {
        let slot = self
            .jpeg
            .lock()
            .map_err(|_| anyhow!("latest frame lock poisoned"))?;
        Ok(slot.clone().unwrap_or_else(|| self.placeholder.clone()))
    }

    pub fn has_frame(&self) -> bool {
        self.jpeg.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_have_expected_geometry() {
        let frame = RgbImage::new(1920, 1080);
        let views = derive_views(
            &frame,
            Resolution::new(DISPLAY_WIDTH, DISPLAY_HEIGHT),
            Resolution::new(PROXY_WIDTH, PROXY_HEIGHT),
        )
        .unwrap();
        assert_eq!(views.display.dimensions(), (1280, 720));
        assert_eq!(views.proxy.dimensions(), (854, 480));
        assert!((views.scale_x - 1280.0 / 854.0).abs() < 1e-6);
        assert!((views.scale_y - 1.5).abs() < 1e-6);
    }

    #[test]
    fn empty_frame_is_rejected() {
        let res = Resolution::new(4, 4);
        assert!(derive_views(&RgbImage::new(0, 0), res, res).is_err());
    }

    #[test]
    fn grid_pads_missing_panels() {
        let white = RgbImage::from_pixel(64, 36, Rgb([255, 255, 255]));
        let grid = compose_grid(&[white.clone(), white]);
        assert_eq!(grid.dimensions(), (1280, 720));
        assert_eq!(*grid.get_pixel(10, 10), Rgb([255, 255, 255]));
        assert_eq!(*grid.get_pixel(650, 10), Rgb([255, 255, 255]));
        assert_eq!(*grid.get_pixel(10, 370), Rgb([0, 0, 0]));
        assert_eq!(*grid.get_pixel(650, 370), Rgb([0, 0, 0]));
    }

    #[test]
    fn latest_frame_falls_back_to_placeholder() {
        let slot = LatestFrame::new(Resolution::new(32, 18)).unwrap();
        assert!(!slot.has_frame());
        let placeholder = slot.get().unwrap();
        assert_eq!(&placeholder[..2], &[0xFF, 0xD8]);
        slot.store(vec![1, 2, 3]).unwrap();
        assert_eq!(slot.get().unwrap(), vec![1, 2, 3]);
    }
}
