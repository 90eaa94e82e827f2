//! Byte-channel plumbing for the console link.
//!
//! - [`serial`]: the duplex channel abstraction the protocol client owns
//! - [`mock_serial`]: an in-memory port plus a scripted console for tests

pub mod mock_serial;
pub mod serial;

pub use serial::{drain_serial_buffer, wrap_shared, DynSerial, SerialPortIO, SharedPort};
