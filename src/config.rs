//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/sem_remcon.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `SEM_REMCON_`, sections separated by
//!    a double underscore, e.g. `SEM_REMCON_SERIAL__PORT=/dev/ttyUSB1`
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration for a console on `/dev/ttyUSB0`.
//!
//! # Example
//! ```no_run
//! use sem_remcon::config::RemconConfig;
//!
//! let config = RemconConfig::load()?;
//! config.validate()?;
//! println!("Console on {}", config.serial.port);
//! # Ok::<(), sem_remcon::error::SemError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{SemError, SemResult};
use crate::stage::{ForbiddenArc, InsertPosition, MotionSettings};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/sem_remcon.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SEM_REMCON_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemconConfig {
    /// Console link
    pub serial: SerialConfig,
    /// Stage motion
    pub stage: StageConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Serial link to the console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Must match the console setting
    pub baud_rate: u32,
    /// Bound on each response line read
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// How long stale input is discarded before each request
    #[serde(with = "humantime_serde")]
    pub flush_window: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_millis(500),
            flush_window: Duration::ZERO,
        }
    }
}

/// Stage motion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Sleep between pose polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Wait bound for moves and steps
    #[serde(with = "humantime_serde")]
    pub move_timeout: Duration,
    /// Wait bound for each insert leg
    #[serde(with = "humantime_serde")]
    pub insert_timeout: Duration,
    /// Rotation sector to route around, `[start, end]` in degrees
    pub forbidden_rotation: Option<[f64; 2]>,
    /// Specimen exchange position
    pub insert: InsertPosition,
}

impl Default for StageConfig {
    fn default() -> Self {
        let motion = MotionSettings::default();
        Self {
            poll_interval: motion.poll_interval,
            move_timeout: motion.move_timeout,
            insert_timeout: motion.insert_timeout,
            forbidden_rotation: None,
            insert: InsertPosition::default(),
        }
    }
}

impl StageConfig {
    /// Poll timing for [`crate::stage::StageController`].
    pub fn motion_settings(&self) -> MotionSettings {
        MotionSettings {
            poll_interval: self.poll_interval,
            move_timeout: self.move_timeout,
            insert_timeout: self.insert_timeout,
        }
    }

    /// Configured fault sector, if any.
    pub fn forbidden_arc(&self) -> Option<ForbiddenArc> {
        self.forbidden_rotation
            .map(|[start, end]| ForbiddenArc::new(start, end))
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// pretty, compact or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl RemconConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> SemResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment. A missing file is not an
    /// error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SemResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(SemError::from)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> SemResult<()> {
        let level = self.logging.level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(SemError::Configuration(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            )));
        }

        let format = self.logging.format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(SemError::Configuration(format!(
                "Invalid logging.format '{}'. Must be one of: {}",
                self.logging.format,
                VALID_FORMATS.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(SemError::Configuration("serial.port is empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(SemError::Configuration("serial.baud_rate must be non-zero".into()));
        }

        let timeouts = [
            ("serial.read_timeout", self.serial.read_timeout),
            ("stage.poll_interval", self.stage.poll_interval),
            ("stage.move_timeout", self.stage.move_timeout),
            ("stage.insert_timeout", self.stage.insert_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(SemError::Configuration(format!("{name} must be non-zero")));
            }
        }

        if let Some([start, end]) = self.stage.forbidden_rotation {
            let in_circle = |deg: f64| deg.is_finite() && (0.0..360.0).contains(&deg);
            if !in_circle(start) || !in_circle(end) {
                return Err(SemError::Configuration(format!(
                    "stage.forbidden_rotation [{start}, {end}] must lie in [0, 360)"
                )));
            }
            if start == end {
                return Err(SemError::Configuration(
                    "stage.forbidden_rotation start and end must differ".into(),
                ));
            }
        }

        Ok(())
    }
}
