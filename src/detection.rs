//! Detector collaborator contract
//!
//! A [`FrameSource`] supplies frames, a [`Detector`] turns a frame into a list
//! of [`Detection`]s. Both are external: a camera and a pretrained model in
//! production, a replay file or a fake in tests.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::geometry::ColorSample;

/// Label the detector uses for people
pub const PERSON_LABEL: &str = "person";

/// Axis-aligned rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point `(x, y)`
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Whether a point lies inside the box (edges inclusive)
    #[must_use]
    pub fn contains_point(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }
}

/// One labeled, scored, localized object in a single frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detector label (e.g. "person", "cup")
    #[serde(alias = "class")]
    pub label: String,

    /// Confidence in `0.0..=1.0`
    pub score: f64,

    /// Location in the frame
    #[serde(alias = "bbox")]
    pub bounding_box: BoundingBox,
}

impl Detection {
    #[must_use]
    pub fn new(label: impl Into<String>, score: f64, bounding_box: BoundingBox) -> Self {
        Self {
            label: label.into(),
            score,
            bounding_box,
        }
    }

    /// Whether this detection is a person
    #[must_use]
    pub fn is_person(&self) -> bool {
        self.label.eq_ignore_ascii_case(PERSON_LABEL)
    }
}

/// Frame dimensions, known once the source is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

/// A single video frame
///
/// Pixels are optional packed RGB rows; without them color sampling is skipped.
#[derive(Debug, Clone)]
pub struct Frame {
    pub geometry: FrameGeometry,
    pub pixels: Option<Vec<u8>>,
    pub captured_at: Instant,
}

impl Frame {
    /// Create a frame without pixel data
    #[must_use]
    pub fn blank(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            pixels: None,
            captured_at: Instant::now(),
        }
    }

    /// Create a frame filled with a single color
    #[must_use]
    pub fn solid(geometry: FrameGeometry, rgb: [u8; 3]) -> Self {
        let count = geometry.width as usize * geometry.height as usize;
        let pixels = rgb.iter().copied().cycle().take(count * 3).collect();
        Self {
            geometry,
            pixels: Some(pixels),
            captured_at: Instant::now(),
        }
    }

    /// Average the pixels in a square neighborhood around `(cx, cy)`
    ///
    /// Returns `None` when the frame carries no pixels or the point is outside the frame.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn sample_color(&self, cx: f64, cy: f64, radius: u32) -> Option<ColorSample> {
        let pixels = self.pixels.as_ref()?;
        let FrameGeometry { width, height } = self.geometry;
        if cx < 0.0 || cy < 0.0 || cx >= f64::from(width) || cy >= f64::from(height) {
            return None;
        }

        let (cx, cy) = (cx as u32, cy as u32);
        let x0 = cx.saturating_sub(radius);
        let y0 = cy.saturating_sub(radius);
        let x1 = (cx + radius).min(width - 1);
        let y1 = (cy + radius).min(height - 1);

        let (mut r, mut g, mut b, mut n) = (0u64, 0u64, 0u64, 0u64);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let idx = (y as usize * width as usize + x as usize) * 3;
                let Some(px) = pixels.get(idx..idx + 3) else {
                    continue;
                };
                r += u64::from(px[0]);
                g += u64::from(px[1]);
                b += u64::from(px[2]);
                n += 1;
            }
        }

        if n == 0 {
            return None;
        }
        Some(ColorSample {
            r: (r / n) as u8,
            g: (g / n) as u8,
            b: (b / n) as u8,
        })
    }
}

/// Supplies video frames on demand
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Acquire the device and wait until the first frame geometry is known
    async fn acquire(&self) -> Result<FrameGeometry>;

    /// Grab the current frame
    async fn next_frame(&self) -> Result<Frame>;

    /// Release the device; safe to call when not acquired
    async fn release(&self);
}

/// Turns a frame into detections (pretrained model)
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_and_contains() {
        let b = BoundingBox::new(10.0, 20.0, 100.0, 50.0);
        assert_eq!(b.center(), (60.0, 45.0));
        assert!(b.contains_point(10.0, 20.0));
        assert!(b.contains_point(110.0, 70.0));
        assert!(!b.contains_point(111.0, 45.0));
    }

    #[test]
    fn test_detection_accepts_source_field_names() {
        let json = r#"{"class":"cup","score":0.8,"bbox":{"x":1,"y":2,"width":3,"height":4}}"#;
        let d: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(d.label, "cup");
        assert_eq!(d.bounding_box, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        assert!(!d.is_person());
    }

    #[test]
    fn test_sample_color_solid_frame() {
        let frame = Frame::solid(FrameGeometry { width: 8, height: 8 }, [10, 20, 200]);
        let sample = frame.sample_color(4.0, 4.0, 2).unwrap();
        assert_eq!(sample, ColorSample { r: 10, g: 20, b: 200 });
    }

    #[test]
    fn test_sample_color_edges() {
        let frame = Frame::solid(FrameGeometry { width: 4, height: 4 }, [1, 2, 3]);
        assert!(frame.sample_color(0.0, 0.0, 5).is_some());
        assert!(frame.sample_color(4.0, 1.0, 1).is_none());
        assert!(frame.sample_color(-1.0, 1.0, 1).is_none());

        let blank = Frame::blank(FrameGeometry { width: 4, height: 4 });
        assert!(blank.sample_color(1.0, 1.0, 1).is_none());
    }
}
