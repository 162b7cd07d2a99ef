//! Frame annotation and JPEG encoding.
//!
//! `annotate` is pure: it never touches tracking or engine state and always
//! returns a new image.

use std::io::Cursor;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::engines::Tripwire;
use crate::track::{Track, TrackStatus};
use crate::zones::{Zone, ZoneType};

pub const JPEG_QUALITY: u8 = 85;

const GREEN: Rgb<u8> = Rgb([16, 185, 129]);
const RED: Rgb<u8> = Rgb([239, 68, 68]);
const AMBER: Rgb<u8> = Rgb([245, 158, 11]);
const YELLOW: Rgb<u8> = Rgb([250, 204, 21]);

/// COCO limb pairs drawn for pose tracks.
const SKELETON: [(usize, usize); 8] = [
    (5, 7),
    (7, 9),
    (6, 8),
    (8, 10),
    (5, 6),
    (5, 11),
    (6, 12),
    (11, 12),
];
const LIMB_MIN_CONFIDENCE: f32 = 0.5;

/// Static scene decorations drawn beneath the tracks.
#[derive(Clone, Copy, Debug, Default)]
pub struct Overlays<'a> {
    pub zones: &'a [Zone],
    pub tripwires: &'a [Tripwire],
    /// Grayscale, histogram-equalised rendering for forensic review.
    pub forensic: bool,
}

pub fn status_color(status: TrackStatus) -> Rgb<u8> {
    match status {
        TrackStatus::Suspicious => RED,
        TrackStatus::Lost => AMBER,
        TrackStatus::Active | TrackStatus::Locked => GREEN,
    }
}

pub fn annotate(frame: &RgbImage, tracks: &[Track], overlays: &Overlays<'_>) -> RgbImage {
    let mut canvas = if overlays.forensic {
        forensic(frame)
    } else {
        frame.clone()
    };
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);

    for zone in overlays.zones.iter().filter(|z| z.active) {
        let color = if zone.kind == ZoneType::Restricted {
            RED
        } else {
            YELLOW
        };
        let n = zone.polygon.len();
        for i in 0..n {
            let (a, b) = (zone.polygon[i], zone.polygon[(i + 1) % n]);
            draw_line_segment_mut(&mut canvas, (a.x, a.y), (b.x, b.y), color);
        }
    }

    for wire in overlays.tripwires {
        let a = (wire.p1.x * w, wire.p1.y * h);
        let b = (wire.p2.x * w, wire.p2.y * h);
        draw_line_segment_mut(&mut canvas, a, b, RED);
        draw_line_segment_mut(&mut canvas, (a.0, a.1 + 1.0), (b.0, b.1 + 1.0), RED);
    }

    for track in tracks {
        draw_track(&mut canvas, track);
    }
    canvas
}

fn draw_track(canvas: &mut RgbImage, track: &Track) {
    let color = status_color(track.status);
    let b = track.bbox;
    let (x, y) = (b.x1.round() as i32, b.y1.round() as i32);
    let (bw, bh) = (b.width().round() as u32, b.height().round() as u32);
    if bw > 2 && bh > 2 {
        draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(bw, bh), color);
        draw_hollow_rect_mut(canvas, Rect::at(x + 1, y + 1).of_size(bw - 2, bh - 2), color);
    }

    if let Some(keypoints) = track.keypoints.as_deref() {
        for (i, j) in SKELETON {
            let (Some(p), Some(q)) = (keypoints.get(i), keypoints.get(j)) else {
                continue;
            };
            if p.confidence > LIMB_MIN_CONFIDENCE && q.confidence > LIMB_MIN_CONFIDENCE {
                draw_line_segment_mut(canvas, (p.x, p.y), (q.x, q.y), color);
            }
        }
    }

    if track.status == TrackStatus::Suspicious {
        let c = track.centroid();
        draw_filled_circle_mut(canvas, (c.x.round() as i32, c.y.round() as i32), 6, RED);
    }
}

fn forensic(frame: &RgbImage) -> RgbImage {
    let gray = equalize_histogram(&image::imageops::grayscale(frame));
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(frame)
        .context("jpeg encode failed")?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BBox, Keypoint, Point};

    #[test]
    fn boxes_take_status_colour() {
        let frame = RgbImage::new(100, 100);
        let mut lost = Track::new(1, "car", BBox::new(10.0, 10.0, 40.0, 40.0), 0.9);
        lost.status = TrackStatus::Lost;
        let active = Track::new(2, "person", BBox::new(50.0, 50.0, 90.0, 90.0), 0.9);
        let out = annotate(&frame, &[lost, active], &Overlays::default());
        assert_eq!(*out.get_pixel(10, 10), AMBER);
        assert_eq!(*out.get_pixel(50, 50), GREEN);
        assert_eq!(*out.get_pixel(25, 25), Rgb([0, 0, 0]));
        // Input frame untouched.
        assert_eq!(*frame.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn confident_limbs_are_drawn() {
        let frame = RgbImage::new(100, 100);
        let mut t = Track::new(1, "person", BBox::new(0.0, 0.0, 99.0, 99.0), 0.9);
        let mut kps = vec![Keypoint::new(0.0, 0.0, 0.0); 17];
        kps[5] = Keypoint::new(30.0, 50.0, 0.9);
        kps[6] = Keypoint::new(70.0, 50.0, 0.9);
        kps[11] = Keypoint::new(30.0, 80.0, 0.2);
        t.keypoints = Some(kps);
        let out = annotate(&frame, &[t], &Overlays::default());
        assert_eq!(*out.get_pixel(50, 50), GREEN);
        assert_eq!(*out.get_pixel(30, 65), Rgb([0, 0, 0]));
    }

    #[test]
    fn restricted_zone_outline_is_red() {
        let frame = RgbImage::new(100, 100);
        let zone = Zone::new(
            "vault",
            "Vault",
            ZoneType::Restricted,
            vec![Point::new(20.0, 20.0), Point::new(80.0, 20.0), Point::new(80.0, 80.0)],
        )
        .unwrap();
        let zones = [zone];
        let overlays = Overlays {
            zones: &zones,
            ..Overlays::default()
        };
        let out = annotate(&frame, &[], &overlays);
        assert_eq!(*out.get_pixel(50, 20), RED);
    }

    #[test]
    fn forensic_mode_is_grayscale() {
        let frame = RgbImage::from_fn(16, 16, |x, _| Rgb([x as u8 * 10, 40, 200]));
        let out = annotate(
            &frame,
            &[],
            &Overlays {
                forensic: true,
                ..Overlays::default()
            },
        );
        assert!(out.pixels().all(|p| p[0] == p[1] && p[1] == p[2]));
    }

    #[test]
    fn jpeg_has_soi_marker() {
        let bytes = encode_jpeg(&RgbImage::new(32, 32), JPEG_QUALITY).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
