//! Vision Narrator - voice-controlled vision assistant core
//!
//! This library turns a stream of per-frame object detections into spoken
//! narration and a drawn overlay, and listens for spoken commands:
//! - Geometry over bounding boxes (held objects, distance, color)
//! - Announcement de-duplication with per-fact cooldowns
//! - A single-speaker voice channel with urgent preemption
//! - Command routing, including questions for a remote language model
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │          FrameSource  →  Detector                    │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ detections
//! ┌────────────────────▼─────────────────────────────────┐
//! │                    Session                            │
//! │  DetectionCoordinator │ Geometry │ Throttle │ Overlay │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ speak / transcripts
//! ┌────────────────────▼─────────────────────────────────┐
//! │   VoiceChannel  ⇄  CommandRouter  →  LanguageModel    │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod llm;
pub mod overlay;
pub mod replay;
pub mod session;
pub mod throttle;
pub mod voice;

pub use commands::{CommandRouter, Intent};
pub use config::NarratorConfig;
pub use coordinator::{Announcement, DetectionCoordinator, FramePlan};
pub use detection::{BoundingBox, Detection, Detector, Frame, FrameGeometry, FrameSource};
pub use error::{Error, Result};
pub use geometry::{ColorDescriptor, classify_color, contains_center, estimate_distance_meters};
pub use llm::{HttpLanguageModel, LanguageModel};
pub use overlay::{BroadcastOverlay, Overlay, OverlayCommand, OverlayStyle};
pub use session::{Session, SessionParts, SessionState, SessionStatus};
pub use throttle::AnnouncementThrottle;
pub use voice::{NarrationMode, VoiceChannel};
