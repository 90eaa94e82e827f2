//! Sparse motion requests.

use crate::remcon::command::StageTarget;
use crate::stage::pose::{StageAxis, StagePose};

/// Sparse target or delta over the five driven axes. Unset axes stay where
/// they are.
///
/// ```rust,ignore
/// let req = MotionRequest::new().x(1.0).rotation(-10.0);
/// controller.set_relative(&req).await?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionRequest {
    /// X.
    pub x: Option<f64>,
    /// Y.
    pub y: Option<f64>,
    /// Z.
    pub z: Option<f64>,
    /// Tilt.
    pub tilt: Option<f64>,
    /// Rotation.
    pub rotation: Option<f64>,
}

impl MotionRequest {
    /// Empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set x.
    pub fn x(mut self, value: f64) -> Self {
        self.x = Some(value);
        self
    }

    /// Set y.
    pub fn y(mut self, value: f64) -> Self {
        self.y = Some(value);
        self
    }

    /// Set z.
    pub fn z(mut self, value: f64) -> Self {
        self.z = Some(value);
        self
    }

    /// Set tilt.
    pub fn tilt(mut self, value: f64) -> Self {
        self.tilt = Some(value);
        self
    }

    /// Set rotation.
    pub fn rotation(mut self, value: f64) -> Self {
        self.rotation = Some(value);
        self
    }

    /// Set any axis.
    pub fn axis(self, axis: StageAxis, value: f64) -> Self {
        match axis {
            StageAxis::X => self.x(value),
            StageAxis::Y => self.y(value),
            StageAxis::Z => self.z(value),
            StageAxis::Tilt => self.tilt(value),
            StageAxis::Rotation => self.rotation(value),
        }
    }

    /// Value for one axis, if set.
    pub fn get(&self, axis: StageAxis) -> Option<f64> {
        match axis {
            StageAxis::X => self.x,
            StageAxis::Y => self.y,
            StageAxis::Z => self.z,
            StageAxis::Tilt => self.tilt,
            StageAxis::Rotation => self.rotation,
        }
    }

    /// True if no axis is set.
    pub fn is_empty(&self) -> bool {
        StageAxis::ALL.iter().all(|a| self.get(*a).is_none())
    }

    /// Full target treating set axes as deltas from `pose`.
    pub fn resolve_relative(&self, pose: &StagePose) -> StageTarget {
        self.resolve(pose, |current, delta| current + delta)
    }

    /// Full target treating set axes as absolute positions.
    pub fn resolve_absolute(&self, pose: &StagePose) -> StageTarget {
        self.resolve(pose, |_, target| target)
    }

    fn resolve(&self, pose: &StagePose, apply: impl Fn(f64, f64) -> f64) -> StageTarget {
        let pick = |axis: StageAxis| {
            let current = pose.axis(axis);
            self.get(axis).map_or(current, |v| apply(current, v))
        };
        StageTarget {
            x: pick(StageAxis::X),
            y: pick(StageAxis::Y),
            z: pick(StageAxis::Z),
            tilt: pick(StageAxis::Tilt),
            rotation: pick(StageAxis::Rotation),
        }
    }
}
