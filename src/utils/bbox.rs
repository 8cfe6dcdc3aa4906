use crate::EstimateClose;
use serde::{Deserialize, Serialize};

/// Bounding box in the format (x, y, width, height), source-frame pixel space
///
#[derive(Clone, Default, Debug, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl BoundingBox {
    /// Constructor
    ///
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Area of the intersection of two boxes, 0 when they do not overlap
    ///
    pub fn intersection(l: &BoundingBox, r: &BoundingBox) -> f32 {
        let (ax0, ay0, ax1, ay1) = (l.x, l.y, l.x + l.width, l.y + l.height);
        let (bx0, by0, bx1, by1) = (r.x, r.y, r.x + r.width, r.y + r.height);

        let int_width = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
        let int_height = (ay1.min(by1) - ay0.max(by0)).max(0.0);

        int_width * int_height
    }

    /// Intersection over union. Degenerate pairs (zero union) produce 0.
    ///
    pub fn iou(l: &BoundingBox, r: &BoundingBox) -> f32 {
        let intersection = Self::intersection(l, r);
        let union = l.area() + r.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Converts the box to integer pixel coordinates clamped to the frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    ///
    /// # Parameters
    /// * `frame_width` - frame width in pixels
    /// * `frame_height` - frame height in pixels
    ///
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).max(0.0).ceil() as u32).min(frame_width);
        let y1 = ((self.y + self.height).max(0.0).ceil() as u32).min(frame_height);

        if x1 > x0 && y1 > y0 {
            Some((x0, y0, x1 - x0, y1 - y0))
        } else {
            None
        }
    }
}

impl EstimateClose for BoundingBox {
    /// Allows comparing bboxes
    ///
    fn almost_same(&self, other: &Self, eps: f32) -> bool {
        (self.x - other.x).abs() < eps
            && (self.y - other.y).abs() < eps
            && (self.width - other.width).abs() < eps
            && (self.height - other.height).abs() < eps
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        BoundingBox::new(v[0], v[1], v[2], v[3])
    }
}
