//! Geometry over one frame's bounding boxes
//!
//! Pure, stateless helpers: hand-zone containment, aspect classification,
//! pinhole distance estimate and color classification.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detection::BoundingBox;

/// Horizontal margin of the hand zone, as a fraction of the person width
const ZONE_MARGIN: f64 = 0.2;

/// Hand zone width as a multiple of the person width
const ZONE_WIDTH_SCALE: f64 = 1.4;

/// Hand zone top, as a fraction of the person height below the box top
const ZONE_TOP: f64 = 0.3;

/// Hand zone height, as a fraction of the person height
const ZONE_HEIGHT: f64 = 0.65;

/// Fallback real-world height for unlisted labels (meters)
pub const FALLBACK_HEIGHT_M: f64 = 0.5;

/// Blue must beat red and green by this factor
const BLUE_TOLERANCE: f64 = 1.05;

/// Minimum blue channel for the blue rescue rule
const BLUE_MIN: u8 = 40;

/// Below this mean brightness a color reads as black
const VERY_DARK: f64 = 45.0;

/// Above this mean brightness a color reads as white
const VERY_LIGHT: f64 = 215.0;

/// Shade cutoffs on mean brightness
const SHADE_DARK_BELOW: f64 = 85.0;
const SHADE_LIGHT_FROM: f64 = 170.0;

/// Torso/hand region derived from a person's box
#[must_use]
pub fn hand_zone(person: &BoundingBox) -> BoundingBox {
    BoundingBox {
        x: person.x - ZONE_MARGIN * person.width,
        y: person.y + ZONE_TOP * person.height,
        width: person.width * ZONE_WIDTH_SCALE,
        height: person.height * ZONE_HEIGHT,
    }
}

/// Whether the center of `inner` lies in the hand zone of `outer`
#[must_use]
pub fn contains_center(outer: &BoundingBox, inner: &BoundingBox) -> bool {
    let (cx, cy) = inner.center();
    hand_zone(outer).contains_point(cx, cy)
}

/// Shape classification of a box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aspect {
    /// Larger side exceeds smaller side by more than the threshold ratio
    pub elongated: bool,
}

/// Classify a box as elongated when its long/short side ratio exceeds `threshold`
///
/// Degenerate boxes (zero or negative side) are never elongated.
#[must_use]
pub fn classify_aspect(bbox: &BoundingBox, threshold: f64) -> Aspect {
    let long = bbox.width.max(bbox.height);
    let short = bbox.width.min(bbox.height);
    if short <= 0.0 {
        return Aspect { elongated: false };
    }
    Aspect {
        elongated: long / short > threshold,
    }
}

/// Label heights and focal length for the pinhole distance estimate
#[derive(Debug, Clone)]
pub struct DistanceModel {
    /// Assumed real-world height per detector label (meters)
    pub heights: HashMap<String, f64>,
    /// Focal length calibration constant (pixels)
    pub focal_length: f64,
    /// Height used for labels missing from `heights`
    pub fallback_height: f64,
}

impl DistanceModel {
    /// Estimate the distance to an object of `label` that spans `pixel_height`
    #[must_use]
    pub fn estimate(&self, label: &str, pixel_height: f64) -> Option<f64> {
        let real = self
            .heights
            .get(label)
            .copied()
            .unwrap_or(self.fallback_height);
        estimate_distance_meters(real, pixel_height, self.focal_length)
    }
}

/// Pinhole approximation: `real_height * focal_length / pixel_height`
///
/// Only the ordering is meaningful. Returns `None` for non-positive pixel heights.
#[must_use]
pub fn estimate_distance_meters(real_height: f64, pixel_height: f64, focal_length: f64) -> Option<f64> {
    if pixel_height <= 0.0 || !pixel_height.is_finite() {
        return None;
    }
    Some(real_height * focal_length / pixel_height)
}

/// Average color over a small pixel neighborhood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorSample {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Hue family of a color sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorFamily {
    Black,
    White,
    Blue,
    Red,
    Green,
    Yellow,
    Gray,
}

impl ColorFamily {
    /// Stable key used for phrase lookup
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::White => "white",
            Self::Blue => "blue",
            Self::Red => "red",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Gray => "gray",
        }
    }
}

/// Brightness qualifier of a hue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shade {
    Light,
    Medium,
    Dark,
}

impl Shade {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Dark => "dark",
        }
    }
}

/// Result of [`classify_color`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorDescriptor {
    pub family: ColorFamily,
    /// `None` for black and white
    pub shade: Option<Shade>,
}

impl fmt::Display for ColorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shade {
            Some(shade) => write!(f, "{} {}", shade.key(), self.family.key()),
            None => f.write_str(self.family.key()),
        }
    }
}

/// Classify an RGB triple into a color family and shade
///
/// Total and deterministic over all inputs. The blue test runs first, before
/// the darkness check, so that dim blues are not read as black or gray.
#[must_use]
pub fn classify_color(r: u8, g: u8, b: u8) -> ColorDescriptor {
    let (rf, gf, bf) = (f64::from(r), f64::from(g), f64::from(b));
    let brightness = (rf + gf + bf) / 3.0;

    let shade = if brightness < SHADE_DARK_BELOW {
        Shade::Dark
    } else if brightness < SHADE_LIGHT_FROM {
        Shade::Medium
    } else {
        Shade::Light
    };
    let hue = |family| ColorDescriptor {
        family,
        shade: Some(shade),
    };

    if b >= BLUE_MIN && bf > rf * BLUE_TOLERANCE && bf > gf * BLUE_TOLERANCE {
        return hue(ColorFamily::Blue);
    }
    if brightness < VERY_DARK {
        return ColorDescriptor {
            family: ColorFamily::Black,
            shade: None,
        };
    }
    if brightness > VERY_LIGHT {
        return ColorDescriptor {
            family: ColorFamily::White,
            shade: None,
        };
    }

    if rf > gf * 1.4 && rf > bf * 1.4 {
        hue(ColorFamily::Red)
    } else if gf > rf * 1.2 && gf > bf * 1.2 {
        hue(ColorFamily::Green)
    } else if r > 150 && g > 150 && b < 100 {
        hue(ColorFamily::Yellow)
    } else {
        hue(ColorFamily::Gray)
    }
}

impl ColorSample {
    #[must_use]
    pub fn classify(self) -> ColorDescriptor {
        classify_color(self.r, self.g, self.b)
    }
}
