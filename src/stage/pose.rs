//! Stage pose as reported by `c95?`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SemError, SemResult};
use crate::remcon::command::StageTarget;
use crate::remcon::decode;

/// Number of fields in a `c95?` reply.
pub const POSE_FIELDS: usize = 7;

/// Snapshot of the stage: five driven axes, the M axis and the moving flag.
///
/// Only ever produced by polling the console.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StagePose {
    /// X position.
    pub x: f64,
    /// Y position.
    pub y: f64,
    /// Z position.
    pub z: f64,
    /// Tilt angle.
    pub tilt: f64,
    /// Rotation angle in degrees.
    pub rotation: f64,
    /// Fifth mechanical axis.
    pub m: f64,
    /// Raw moving flag, 0 when stationary.
    pub moving_flag: f64,
}

impl StagePose {
    /// Decode a `c95?` payload. Exactly seven numbers are required.
    pub fn parse(command: &str, payload: &str) -> SemResult<Self> {
        match decode::parse_floats(command, payload)?.as_slice() {
            &[x, y, z, tilt, rotation, m, moving_flag] => Ok(Self {
                x,
                y,
                z,
                tilt,
                rotation,
                m,
                moving_flag,
            }),
            other => Err(SemError::decode(
                command,
                payload,
                format!("expected {POSE_FIELDS} values, got {}", other.len()),
            )),
        }
    }

    /// True while the console reports motion.
    pub fn is_moving(&self) -> bool {
        self.moving_flag != 0.0
    }

    /// The five driven axes as an absolute move target.
    pub fn target(&self) -> StageTarget {
        StageTarget {
            x: self.x,
            y: self.y,
            z: self.z,
            tilt: self.tilt,
            rotation: self.rotation,
        }
    }

    /// Position along one axis.
    pub fn axis(&self, axis: StageAxis) -> f64 {
        match axis {
            StageAxis::X => self.x,
            StageAxis::Y => self.y,
            StageAxis::Z => self.z,
            StageAxis::Tilt => self.tilt,
            StageAxis::Rotation => self.rotation,
        }
    }
}

impl fmt::Display for StagePose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x={:.4} y={:.4} z={:.4} tilt={:.2} rot={:.2} m={:.2}{}",
            self.x,
            self.y,
            self.z,
            self.tilt,
            self.rotation,
            self.m,
            if self.is_moving() { " (moving)" } else { "" }
        )
    }
}

/// The axes a move can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageAxis {
    /// X.
    X,
    /// Y.
    Y,
    /// Z.
    Z,
    /// Tilt.
    Tilt,
    /// Rotation.
    #[serde(alias = "rot")]
    Rotation,
}

impl StageAxis {
    /// All driven axes, in `c95` parameter order.
    pub const ALL: [StageAxis; 5] = [
        StageAxis::X,
        StageAxis::Y,
        StageAxis::Z,
        StageAxis::Tilt,
        StageAxis::Rotation,
    ];
}

impl fmt::Display for StageAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageAxis::X => "x",
            StageAxis::Y => "y",
            StageAxis::Z => "z",
            StageAxis::Tilt => "tilt",
            StageAxis::Rotation => "rot",
        })
    }
}

impl FromStr for StageAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x" => Ok(StageAxis::X),
            "y" => Ok(StageAxis::Y),
            "z" => Ok(StageAxis::Z),
            "t" | "tilt" => Ok(StageAxis::Tilt),
            "r" | "rot" | "rotation" => Ok(StageAxis::Rotation),
            other => Err(format!("unknown stage axis '{other}'")),
        }
    }
}
