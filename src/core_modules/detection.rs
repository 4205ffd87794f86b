// THEORY:
// A `Detection` is the spatial summary of one bright region in one frame: where
// it is, how big it is, how bright it is and what colour family it belongs to.
// Like the rest of the single-frame layer it is a stateless data container. It
// has no identity across frames; giving it one is the tracker's job.

use serde::{Deserialize, Serialize};

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned box, top-left corner plus size, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Width / height. Zero-height boxes report 0.0.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// Colour family of a lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LightColor {
    White,
    Amber,
}

impl LightColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::White => "WHITE",
            Self::Amber => "AMBER",
        }
    }
}

/// One candidate light region in a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box enclosing every mask pixel of the region.
    pub bounding_box: BoundingBox,
    /// Mean position of the region's mask pixels.
    pub centroid: Point,
    /// Number of mask pixels in the region.
    pub area: u32,
    /// Mean Rec. 601 luma of the region's mask pixels (0..255).
    pub mean_intensity: f64,
    pub color: LightColor,
}

impl Detection {
    /// A detection is usable for association only if its centroid can be measured.
    pub fn has_valid_geometry(&self) -> bool {
        self.area > 0 && self.centroid.is_finite() && self.mean_intensity.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        assert_eq!(Point::new(0.0, 0.0).distance_to(&Point::new(3.0, 4.0)), 5.0);
    }

    #[test]
    fn aspect_ratio_handles_degenerate_boxes() {
        assert_eq!(BoundingBox::new(0, 0, 20, 10).aspect_ratio(), 2.0);
        assert_eq!(BoundingBox::new(0, 0, 20, 0).aspect_ratio(), 0.0);
    }

    #[test]
    fn nan_centroid_is_invalid_geometry() {
        let detection = Detection {
            bounding_box: BoundingBox::new(0, 0, 10, 10),
            centroid: Point::new(f64::NAN, 5.0),
            area: 100,
            mean_intensity: 200.0,
            color: LightColor::White,
        };
        assert!(!detection.has_valid_geometry());
    }
}
