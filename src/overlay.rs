//! Drawn overlay on top of the video frame
//!
//! The coordinator emits [`OverlayCommand`]s; an [`Overlay`] applies them.
//! [`BroadcastOverlay`] keeps the current frame's boxes and fans every command
//! out to subscribers (a UI, a logger).

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::detection::{BoundingBox, FrameGeometry};
use crate::{Error, Result};

/// Channel capacity for overlay updates
const CHANNEL_CAPACITY: usize = 256;

/// How a box is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayStyle {
    /// Plain object sighting
    Object,
    /// Person with nothing in hand
    Person,
    /// Benign object held near a person's hands
    Held,
    /// Held object classified as a threat
    Threat,
}

impl OverlayStyle {
    /// Stroke color as `#rrggbb`
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Object => "#00ff00",
            Self::Person => "#00aaff",
            Self::Held => "#ffcc00",
            Self::Threat => "#ff0000",
        }
    }

    /// Stroke width in pixels
    #[must_use]
    pub const fn line_width(self) -> u32 {
        match self {
            Self::Threat => 8,
            Self::Held => 6,
            Self::Object | Self::Person => 4,
        }
    }
}

/// One overlay drawing instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlayCommand {
    /// Remove everything drawn for the previous frame
    Clear,
    /// Stroke a box and write its caption
    Box {
        bounding_box: BoundingBox,
        style: OverlayStyle,
        caption: String,
        /// Caption anchor `(x, y)`
        caption_at: (f64, f64),
    },
}

impl OverlayCommand {
    /// Box command with the caption placed above the box, or inside the top
    /// edge when there is no room above it
    #[must_use]
    pub fn boxed(bounding_box: BoundingBox, style: OverlayStyle, caption: String) -> Self {
        let caption_y = if bounding_box.y > 20.0 {
            bounding_box.y - 10.0
        } else {
            20.0
        };
        Self::Box {
            bounding_box,
            style,
            caption,
            caption_at: (bounding_box.x, caption_y),
        }
    }
}

/// Draw side effect seam
pub trait Overlay: Send + Sync {
    /// Apply one frame's commands in order
    ///
    /// # Errors
    ///
    /// Returns error if drawing fails
    fn render(&self, commands: &[OverlayCommand]) -> Result<()>;

    /// Clear everything drawn
    ///
    /// # Errors
    ///
    /// Returns error if drawing fails
    fn clear(&self) -> Result<()> {
        self.render(&[OverlayCommand::Clear])
    }

    /// Match the overlay size to the frame size
    fn resize(&self, _geometry: FrameGeometry) {}
}

/// Overlay state manager
///
/// Maintains the boxes drawn for the current frame and broadcasts commands to subscribers.
pub struct BroadcastOverlay {
    elements: Mutex<Vec<OverlayCommand>>,
    geometry: Mutex<Option<FrameGeometry>>,
    tx: broadcast::Sender<OverlayCommand>,
}

impl Default for BroadcastOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastOverlay {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            elements: Mutex::new(Vec::new()),
            geometry: Mutex::new(None),
            tx,
        }
    }

    /// Subscribe to overlay updates
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayCommand> {
        self.tx.subscribe()
    }

    /// Boxes currently drawn
    #[must_use]
    pub fn elements(&self) -> Vec<OverlayCommand> {
        self.elements
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Size of the overlay, once known
    #[must_use]
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry.lock().ok().and_then(|g| *g)
    }
}

impl Overlay for BroadcastOverlay {
    fn render(&self, commands: &[OverlayCommand]) -> Result<()> {
        let mut elements = self
            .elements
            .lock()
            .map_err(|_| Error::Overlay("overlay state poisoned".to_string()))?;

        for command in commands {
            match command {
                OverlayCommand::Clear => elements.clear(),
                OverlayCommand::Box { .. } => elements.push(command.clone()),
            }
            // Broadcast to subscribers (ignore errors if no subscribers)
            let _ = self.tx.send(command.clone());
        }
        Ok(())
    }

    fn resize(&self, geometry: FrameGeometry) {
        if let Ok(mut g) = self.geometry.lock() {
            *g = Some(geometry);
        }
    }
}
