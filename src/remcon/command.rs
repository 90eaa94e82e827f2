//! The enumerated RemCon32 command set.
//!
//! Every operation the driver can issue is a [`Command`] variant, mapped at
//! compile time to its wire verb (or macro number). Encoding applies the
//! parameter clamp, so no caller can put an out-of-range value on the wire.
//!
//! Clamping is silent saturation, not validation: asking for 500 % stigmation
//! sends 100 %, with no error. Consoles behave the same way from their own
//! front panels and existing operator scripts depend on it.

use std::fmt;

use crate::error::{SemError, SemResult};

/// Saturate `value` to `[min, max]`.
///
/// Never panics. A NaN value saturates to `min`. For `min <= max` the result is
/// idempotent: `clamp(clamp(v, lo, hi), lo, hi) == clamp(v, lo, hi)`.
pub fn clamp<T: PartialOrd>(value: T, min: T, max: T) -> T {
    let lower = if value > min { value } else { min };
    if lower < max {
        lower
    } else {
        max
    }
}

/// Closed range a command parameter is saturated to before encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange<T> {
    /// Lower bound, inclusive.
    pub min: T,
    /// Upper bound, inclusive.
    pub max: T,
}

impl<T: PartialOrd + Copy> ParameterRange<T> {
    /// New range. `min` must not exceed `max`.
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    /// Saturate `value` to this range.
    pub fn clamp(&self, value: T) -> T {
        clamp(value, self.min, self.max)
    }
}

/// Stigmator, alignment and beam shift, in percent.
pub const PERCENT: ParameterRange<f64> = ParameterRange::new(-100.0, 100.0);
/// Accelerating voltage in kV.
pub const ACCELERATING_VOLTAGE: ParameterRange<f64> = ParameterRange::new(0.0, 30.0);
/// Aperture slot index.
pub const APERTURE: ParameterRange<i32> = ParameterRange::new(1, 6);
/// Detector brightness and contrast, in percent.
pub const DETECTOR_LEVEL: ParameterRange<f64> = ParameterRange::new(0.0, 100.0);
/// Magnification.
pub const MAGNIFICATION: ParameterRange<f64> = ParameterRange::new(5.0, 1.0e6);
/// Working distance in mm.
pub const WORKING_DISTANCE: ParameterRange<f64> = ParameterRange::new(0.0, 50.0);
/// Spot-mode x coordinate in scan pixels.
pub const SPOT_X: ParameterRange<i32> = ParameterRange::new(0, 1023);
/// Spot-mode y coordinate in scan pixels.
pub const SPOT_Y: ParameterRange<i32> = ParameterRange::new(0, 767);

/// Numbered console macros (`REMCONn` in SmartSEM).
///
/// They fill in for operations the command set lacks. Each macro must exist
/// on the console or the `mac` command fails with code 616.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Macro {
    /// REMCON1: dual monitor mode on.
    DualMonitorOn,
    /// REMCON2: display focus on the primary display.
    DisplayFocusPrimary,
    /// REMCON3: display focus on the secondary display.
    DisplayFocusSecondary,
    /// REMCON4: Auger probe current max.
    ProbeCurrentMax,
    /// REMCON5: Auger probe current 3.0 nA.
    ProbeCurrent3nA,
    /// REMCON6: Auger probe current 1.0 nA.
    ProbeCurrent1nA,
    /// REMCON7: Auger probe current 400 pA.
    ProbeCurrent400pA,
    /// REMCON8: high current mode on (not on Auger consoles).
    HighCurrentOn,
    /// REMCON9: high current mode off (not on Auger consoles).
    HighCurrentOff,
    /// REMCON10: dual monitor mode off.
    DualMonitorOff,
}

impl Macro {
    /// Macro number as used by `mac <n>`.
    pub const fn number(self) -> u8 {
        match self {
            Macro::DualMonitorOn => 1,
            Macro::DisplayFocusPrimary => 2,
            Macro::DisplayFocusSecondary => 3,
            Macro::ProbeCurrentMax => 4,
            Macro::ProbeCurrent3nA => 5,
            Macro::ProbeCurrent1nA => 6,
            Macro::ProbeCurrent400pA => 7,
            Macro::HighCurrentOn => 8,
            Macro::HighCurrentOff => 9,
            Macro::DualMonitorOff => 10,
        }
    }
}

/// Which display brightness/contrast/detector commands act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Display {
    /// Display 0.
    #[default]
    Primary,
    /// Display 1.
    Secondary,
}

impl Display {
    pub(crate) fn focus_macro(self) -> Macro {
        match self {
            Display::Primary => Macro::DisplayFocusPrimary,
            Display::Secondary => Macro::DisplayFocusSecondary,
        }
    }
}

/// Auger probe current presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProbeCurrent {
    /// Maximum probe current.
    #[default]
    Max,
    /// 3.0 nA.
    NanoAmp3,
    /// 1.0 nA.
    NanoAmp1,
    /// 400 pA.
    PicoAmp400,
}

impl ProbeCurrent {
    pub(crate) fn preset_macro(self) -> Macro {
        match self {
            ProbeCurrent::Max => Macro::ProbeCurrentMax,
            ProbeCurrent::NanoAmp3 => Macro::ProbeCurrent3nA,
            ProbeCurrent::NanoAmp1 => Macro::ProbeCurrent1nA,
            ProbeCurrent::PicoAmp400 => Macro::ProbeCurrent400pA,
        }
    }
}

/// Absolute five-axis stage target for `c95`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StageTarget {
    /// X position.
    pub x: f64,
    /// Y position.
    pub y: f64,
    /// Z position.
    pub z: f64,
    /// Tilt angle.
    pub tilt: f64,
    /// Rotation angle.
    pub rotation: f64,
}

/// One console operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `EHT?`: actual accelerating voltage in kV.
    GetKv,
    /// `EHT <kV>`: requested accelerating voltage.
    SetKv(f64),
    /// `bmon 1` turns EHT on (and the gun if off), `bmon 2` turns EHT off.
    SetEht(bool),
    /// `bblk 1/0`.
    SetBlank(bool),
    /// `bbl?`.
    GetBlank,
    /// `stim <x> <y>`, percent.
    SetStig {
        /// X stigmator.
        x: f64,
        /// Y stigmator.
        y: f64,
    },
    /// `sti?`.
    GetStig,
    /// `aper <n>`.
    SetAperture(i32),
    /// `apr?`.
    GetAperture,
    /// `aaln <x> <y>`, percent, for the selected aperture.
    SetApertureAlign {
        /// X alignment.
        x: f64,
        /// Y alignment.
        y: f64,
    },
    /// `aln?`.
    GetApertureAlign,
    /// `galn <x> <y>`, percent. Write-only on the console.
    SetGunAlign {
        /// X alignment.
        x: f64,
        /// Y alignment.
        y: f64,
    },
    /// `BEAM <x> <y>`: percent in, ±1 on the wire. Write-only.
    SetBeamShift {
        /// X shift in percent.
        x: f64,
        /// Y shift in percent.
        y: f64,
    },
    /// `mac <n>`.
    RunMacro(Macro),
    /// `scm 1/0`: specimen current monitor.
    SetScm(bool),
    /// `prb?`: specimen current in amps. Fails while the monitor is off.
    GetProbeCurrent,
    /// `bgtt <v>`, percent, focused display.
    SetBrightness(f64),
    /// `bgt?`.
    GetBrightness,
    /// `crst <v>`, percent, focused display.
    SetContrast(f64),
    /// `cst?`.
    GetContrast,
    /// `det <name>`, focused display.
    SetDetector(String),
    /// `det?`.
    GetDetector,
    /// `norm`: both displays unfrozen, scanning normally (not spot mode).
    Normal,
    /// `edx 1/0`: external scan.
    SetExtScan(bool),
    /// `exs?`.
    GetExtScan,
    /// `mag <v>`.
    SetMag(f64),
    /// `mag?`.
    GetMag,
    /// `focs <mm>`: working distance.
    SetWorkingDistance(f64),
    /// `foc?`.
    GetWorkingDistance,
    /// `pix?`: pixel size in nm.
    GetPixelSize,
    /// `spot <x> <y>`.
    SetSpot {
        /// X pixel.
        x: i32,
        /// Y pixel.
        y: i32,
    },
    /// `c95?`: x y z tilt rot M moving.
    GetStagePose,
    /// `ist?`: stage type and initialisation status.
    GetStageInit,
    /// `c95 <x> <y> <z> <tilt> <rot> 0.0`: absolute move. Range checks are the
    /// console's job (code 603).
    MoveStage(StageTarget),
}

fn flag(on: bool) -> u8 {
    u8::from(on)
}

impl Command {
    /// Wire text without the carriage-return terminator.
    pub fn encode(&self) -> String {
        match self {
            Command::GetKv => "EHT?".to_string(),
            Command::SetKv(kv) => format!("EHT {:.6}", ACCELERATING_VOLTAGE.clamp(*kv)),
            Command::SetEht(on) => format!("bmon {}", if *on { 1 } else { 2 }),
            Command::SetBlank(on) => format!("bblk {}", flag(*on)),
            Command::GetBlank => "bbl?".to_string(),
            Command::SetStig { x, y } => {
                format!("stim {:.6} {:.6}", PERCENT.clamp(*x), PERCENT.clamp(*y))
            }
            Command::GetStig => "sti?".to_string(),
            Command::SetAperture(n) => format!("aper {}", APERTURE.clamp(*n)),
            Command::GetAperture => "apr?".to_string(),
            Command::SetApertureAlign { x, y } => {
                format!("aaln {:.6} {:.6}", PERCENT.clamp(*x), PERCENT.clamp(*y))
            }
            Command::GetApertureAlign => "aln?".to_string(),
            Command::SetGunAlign { x, y } => {
                format!("galn {:.6} {:.6}", PERCENT.clamp(*x), PERCENT.clamp(*y))
            }
            Command::SetBeamShift { x, y } => format!(
                "BEAM {:.6} {:.6}",
                PERCENT.clamp(*x) / 100.0,
                PERCENT.clamp(*y) / 100.0
            ),
            Command::RunMacro(m) => format!("mac {}", m.number()),
            Command::SetScm(on) => format!("scm {}", flag(*on)),
            Command::GetProbeCurrent => "prb?".to_string(),
            Command::SetBrightness(v) => format!("bgtt {:.6}", DETECTOR_LEVEL.clamp(*v)),
            Command::GetBrightness => "bgt?".to_string(),
            Command::SetContrast(v) => format!("crst {:.6}", DETECTOR_LEVEL.clamp(*v)),
            Command::GetContrast => "cst?".to_string(),
            Command::SetDetector(name) => format!("det {}", name.trim()),
            Command::GetDetector => "det?".to_string(),
            Command::Normal => "norm".to_string(),
            Command::SetExtScan(on) => format!("edx {}", flag(*on)),
            Command::GetExtScan => "exs?".to_string(),
            Command::SetMag(v) => format!("mag {:.6}", MAGNIFICATION.clamp(*v)),
            Command::GetMag => "mag?".to_string(),
            Command::SetWorkingDistance(mm) => format!("focs {:.6}", WORKING_DISTANCE.clamp(*mm)),
            Command::GetWorkingDistance => "foc?".to_string(),
            Command::GetPixelSize => "pix?".to_string(),
            Command::SetSpot { x, y } => format!("spot {} {}", SPOT_X.clamp(*x), SPOT_Y.clamp(*y)),
            Command::GetStagePose => "c95?".to_string(),
            Command::GetStageInit => "ist?".to_string(),
            Command::MoveStage(t) => format!(
                "c95 {:.6} {:.6} {:.6} {:.6} {:.6} 0.0",
                t.x, t.y, t.z, t.tilt, t.rotation
            ),
        }
    }

    /// Reject arguments that cannot travel as one ASCII request line.
    ///
    /// Numeric parameters are clamped by [`encode`](Self::encode) instead; only
    /// free-text arguments can fail here.
    pub fn validate(&self) -> SemResult<()> {
        match self {
            Command::SetDetector(name) => check_detector_name(name),
            _ => Ok(()),
        }
    }
}

fn check_detector_name(name: &str) -> SemResult<()> {
    let invalid = |reason: &str| SemError::InvalidArgument {
        verb: "det",
        reason: format!("{reason}: {name:?}"),
    };
    if name.trim().is_empty() {
        return Err(invalid("empty detector name"));
    }
    // A CR or LF would end the request early and start a second command
    if name.chars().any(|c| !c.is_ascii() || c.is_ascii_control()) {
        return Err(invalid("detector name must be printable ASCII"));
    }
    Ok(())
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_saturates_both_bounds() {
        assert_eq!(clamp(500.0, -100.0, 100.0), 100.0);
        assert_eq!(clamp(-500.0, -100.0, 100.0), -100.0);
        assert_eq!(clamp(42.5, -100.0, 100.0), 42.5);
        assert_eq!(clamp(0, 1, 6), 1);
        assert_eq!(clamp(9, 1, 6), 6);
    }

    #[test]
    fn test_clamp_nan_saturates_to_min() {
        assert_eq!(clamp(f64::NAN, 0.0, 30.0), 0.0);
    }

    #[test]
    fn test_clamp_is_idempotent() {
        let values = [-1e9, -100.0, -99.999, -0.0, 0.0, 1e-12, 50.0, 100.0, 100.5, 1e9];
        let ranges = [(-100.0, 100.0), (0.0, 30.0), (5.0, 1e6), (3.0, 3.0)];
        for (lo, hi) in ranges {
            for v in values {
                let once = clamp(v, lo, hi);
                assert_eq!(clamp(once, lo, hi), once, "v={v} lo={lo} hi={hi}");
                assert!(once >= lo && once <= hi);
                if v >= lo && v <= hi {
                    assert_eq!(once, v);
                }
            }
        }
    }

    #[test]
    fn test_setters_clamp_at_encode_time() {
        // Intentional: out-of-range requests saturate silently.
        assert_eq!(Command::SetKv(45.0).encode(), "EHT 30.000000");
        assert_eq!(Command::SetKv(-1.0).encode(), "EHT 0.000000");
        assert_eq!(
            Command::SetStig { x: 500.0, y: -7.5 }.encode(),
            "stim 100.000000 -7.500000"
        );
        assert_eq!(Command::SetAperture(0).encode(), "aper 1");
        assert_eq!(Command::SetAperture(12).encode(), "aper 6");
        assert_eq!(Command::SetMag(1.0).encode(), "mag 5.000000");
        assert_eq!(Command::SetWorkingDistance(80.0).encode(), "focs 50.000000");
        assert_eq!(Command::SetBrightness(-3.0).encode(), "bgtt 0.000000");
        assert_eq!(Command::SetContrast(130.0).encode(), "crst 100.000000");
        assert_eq!(Command::SetSpot { x: 2000, y: -4 }.encode(), "spot 1023 0");
    }

    #[test]
    fn test_beam_shift_scales_after_clamp() {
        assert_eq!(
            Command::SetBeamShift { x: 50.0, y: -250.0 }.encode(),
            "BEAM 0.500000 -1.000000"
        );
    }

    #[test]
    fn test_toggle_encodings() {
        assert_eq!(Command::SetEht(true).encode(), "bmon 1");
        assert_eq!(Command::SetEht(false).encode(), "bmon 2");
        assert_eq!(Command::SetBlank(true).encode(), "bblk 1");
        assert_eq!(Command::SetScm(false).encode(), "scm 0");
        assert_eq!(Command::SetExtScan(true).encode(), "edx 1");
    }

    #[test]
    fn test_macro_numbers() {
        assert_eq!(Command::RunMacro(Macro::DualMonitorOn).encode(), "mac 1");
        assert_eq!(Command::RunMacro(Macro::DualMonitorOff).encode(), "mac 10");
        assert_eq!(Display::Secondary.focus_macro().number(), 3);
        assert_eq!(ProbeCurrent::PicoAmp400.preset_macro().number(), 7);
    }

    #[test]
    fn test_stage_move_reserved_parameter() {
        let cmd = Command::MoveStage(StageTarget {
            x: 90.0,
            y: 65.0,
            z: 40.0,
            tilt: 0.0,
            rotation: 275.0,
        });
        assert_eq!(
            cmd.to_string(),
            "c95 90.000000 65.000000 40.000000 0.000000 275.000000 0.0"
        );
    }

    #[test]
    fn test_detector_name_must_be_one_ascii_line() {
        for name in ["SE2\rbmon 2", "InLens\n", "SE\u{2082}", "   ", "SE2\t"] {
            let cmd = Command::SetDetector(name.into());
            match cmd.validate() {
                Err(SemError::InvalidArgument { verb, .. }) => assert_eq!(verb, "det"),
                other => panic!("{name:?} accepted: {other:?}"),
            }
        }
        let ok = Command::SetDetector(" SE2 ".into());
        assert!(ok.validate().is_ok());
        assert_eq!(ok.encode(), "det SE2");
    }
}
