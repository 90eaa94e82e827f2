//! Rotation-fault avoidance.
//!
//! Some stages fault when a rotation sweeps through a particular sector. Which
//! sector depends on the machine, so the controller asks a [`RotationPolicy`]
//! for the rotations to visit instead of moving straight to the target.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Decides the rotation waypoints between two angles (degrees).
pub trait RotationPolicy: Send + Sync + Debug {
    /// Rotations to visit in order. The last entry is `target`; at most one
    /// intermediate rotation precedes it.
    fn waypoints(&self, current: f64, target: f64) -> Vec<f64>;
}

/// Always rotates straight to the target.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DirectRotation;

impl RotationPolicy for DirectRotation {
    fn waypoints(&self, _current: f64, target: f64) -> Vec<f64> {
        vec![target]
    }
}

/// A sector the stage must not sweep through, from `start` increasing to `end`
/// in degrees. `start > end` wraps through 0.
///
/// When the shortest rotation crosses the sector, the move goes the other way
/// round via the midpoint of the long arc.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForbiddenArc {
    /// First angle of the sector.
    pub start: f64,
    /// Last angle of the sector.
    pub end: f64,
}

fn normalize(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}

/// Signed shortest rotation from `from` to `to`, in (-180, 180].
fn shortest_delta(from: f64, to: f64) -> f64 {
    let d = normalize(to - from);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

fn in_arc(angle: f64, start: f64, len: f64) -> bool {
    normalize(angle - start) <= len
}

impl ForbiddenArc {
    /// Sector from `start` to `end`.
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    fn len(&self) -> f64 {
        normalize(self.end - self.start)
    }

    /// True if rotating by `delta` from `from` sweeps through the sector.
    pub fn is_crossed(&self, from: f64, delta: f64) -> bool {
        let (path_start, path_len) = if delta >= 0.0 {
            (from, delta)
        } else {
            (from + delta, -delta)
        };
        in_arc(path_start, self.start, self.len()) || in_arc(self.start, path_start, path_len)
    }
}

impl RotationPolicy for ForbiddenArc {
    fn waypoints(&self, current: f64, target: f64) -> Vec<f64> {
        let short = shortest_delta(current, target);
        if short == 0.0 || !self.is_crossed(current, short) {
            return vec![target];
        }

        let long = if short > 0.0 { short - 360.0 } else { short + 360.0 };
        if self.is_crossed(current, long) {
            tracing::warn!(
                current,
                target,
                "Both rotation directions cross the forbidden sector; moving directly"
            );
            return vec![target];
        }

        vec![normalize(current + long / 2.0), target]
    }
}
