use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in pixel coordinates (x1,y1 top-left, x2,y2 bottom-right).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection over union. Degenerate boxes yield 0.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    pub fn offset(&self, dx: f32, dy: f32) -> BBox {
        BBox::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    pub fn scale(&self, sx: f32, sy: f32) -> BBox {
        BBox::new(self.x1 * sx, self.y1 * sy, self.x2 * sx, self.y2 * sy)
    }
}

/// A point in pixel (or normalised) coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Single pose keypoint (COCO ordering when 17 are present).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Keypoint {
        Keypoint::new(self.x + dx, self.y + dy, self.confidence)
    }

    pub fn scale(&self, sx: f32, sy: f32) -> Keypoint {
        Keypoint::new(self.x * sx, self.y * sy, self.confidence)
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Raw output of a detection provider for one image region. Produced fresh each frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub label: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<Vec<Keypoint>>,
}

impl Detection {
    pub fn new(bbox: BBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            keypoints: None,
        }
    }

    pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
        self.keypoints = Some(keypoints);
        self
    }

    /// Map a detection from region coordinates back into frame coordinates.
    pub fn offset(mut self, dx: f32, dy: f32) -> Self {
        self.bbox = self.bbox.offset(dx, dy);
        if let Some(kpts) = self.keypoints.as_mut() {
            for k in kpts.iter_mut() {
                *k = k.offset(dx, dy);
            }
        }
        self
    }

    pub fn scale(mut self, sx: f32, sy: f32) -> Self {
        self.bbox = self.bbox.scale(sx, sy);
        if let Some(kpts) = self.keypoints.as_mut() {
            for k in kpts.iter_mut() {
                *k = k.scale(sx, sy);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn offset_moves_box_and_keypoints() {
        let det = Detection::new(BBox::new(1.0, 2.0, 3.0, 4.0), "person", 0.9)
            .with_keypoints(vec![Keypoint::new(2.0, 3.0, 0.8)])
            .offset(100.0, 50.0);
        assert_eq!(det.bbox, BBox::new(101.0, 52.0, 103.0, 54.0));
        assert_eq!(det.keypoints.unwrap()[0], Keypoint::new(102.0, 53.0, 0.8));
    }
}
