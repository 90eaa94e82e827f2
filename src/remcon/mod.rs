//! RemCon32 console protocol.
//!
//! - [`command`]: the enumerated operation set and parameter clamps
//! - [`frame`]: ack/data response interpretation
//! - [`codes`]: numbered console errors
//! - [`client`]: the exchange loop and typed operations
//! - [`imaging`]: field-of-view helpers on top of the client

pub mod client;
pub mod codes;
pub mod command;
pub mod decode;
pub mod frame;
pub mod imaging;

pub use client::{ClientConfig, RemconClient};
pub use command::{clamp, Command, Display, Macro, ParameterRange, ProbeCurrent, StageTarget};
pub use frame::ResponseFrame;
