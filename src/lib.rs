//! # SEM Remote Control Library
//!
//! Driver for scanning electron microscope consoles that speak the RemCon32
//! serial protocol, plus the stage motion sequencing built on top of it.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: the byte channel the client owns (`SharedPort`), serial port
//!   opening, and an in-memory mock port with a scripted console for tests.
//! - **`remcon`**: the protocol. `command` enumerates every console operation and
//!   clamps its parameters, `frame` interprets the ack/data reply pair, `codes`
//!   maps numbered failures, `client` runs exchanges and exposes typed getters and
//!   setters, `imaging` derives field of view from pixel size.
//! - **`stage`**: `StageController`, which issues moves with the specimen current
//!   interlock disabled, polls until the stage settles, and routes rotations
//!   around a configurable fault sector.
//! - **`config`**: `RemconConfig`, loaded with `figment` from TOML and the environment.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: `SemError`, the crate-wide error type.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sem_remcon::{config::RemconConfig, remcon::RemconClient, stage::{MotionRequest, StageController}};
//!
//! let config = RemconConfig::load()?;
//! let client = Arc::new(RemconClient::open(&config).await?);
//! client.set_kv(5.0).await?;
//!
//! let stage = StageController::new(client.clone(), config.stage.motion_settings());
//! stage.step(sem_remcon::stage::StageAxis::X, 0.010).await?;
//! ```

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod remcon;
pub mod stage;

pub use error::{ChannelError, SemError, SemResult};
