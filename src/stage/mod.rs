//! Stage motion on top of the console client.
//!
//! [`StageController`] issues moves through a [`StageLink`] (implemented by
//! [`crate::remcon::RemconClient`]) and polls until the stage settles.

pub mod controller;
pub mod link;
pub mod motion;
pub mod pose;
pub mod rotation;

pub use controller::{InsertPosition, MotionSettings, MotionState, MotionStatus, StageController};
pub use link::StageLink;
pub use motion::MotionRequest;
pub use pose::{StageAxis, StagePose};
pub use rotation::{DirectRotation, ForbiddenArc, RotationPolicy};
