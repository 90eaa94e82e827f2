//! Serial channel abstractions for the console link.
//!
//! The protocol client only needs a duplex byte stream. Anything that is
//! `AsyncRead + AsyncWrite + Unpin + Send` qualifies:
//! - `tokio_serial::SerialStream` (real hardware, feature `serial`)
//! - `tokio::io::DuplexStream` (testing)
//! - [`super::mock_serial::MockSerialPort`] (scripted device in tests)
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite
//! - [`DynSerial`]: type-erased boxed channel
//! - [`SharedPort`]: mutex-guarded channel with buffered line reading
//!
//! # Example
//!
//! ```rust,ignore
//! use sem_remcon::hardware::serial::{open_serial_async, wrap_shared};
//!
//! let port = open_serial_async("/dev/ttyUSB0", 9600).await?;
//! let shared = wrap_shared(Box::new(port));
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Trait alias for async serial port I/O.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial channel.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Mutex-guarded serial channel with buffered reading.
///
/// The console protocol is strictly one request in flight, so the mutex is the
/// only thing standing between two callers and a corrupted ack/data pairing.
/// `BufReader` gives us `read_until` for the CRLF-terminated response lines.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Create a [`SharedPort`] from a type-erased channel.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open a serial port on a blocking thread.
///
/// The RemCon32 console uses fixed line settings: 8 data bits, no parity,
/// one stop bit, no flow control. Only the baud rate is configurable, and it
/// must match what is set on the console (9600 out of the box).
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> crate::error::SemResult<tokio_serial::SerialStream> {
    use crate::error::ChannelError;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let opened = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(std::io::Error::from)
    })
    .await
    .map_err(std::io::Error::other)
    .and_then(|inner| inner);

    opened.map_err(|source| {
        ChannelError::Open {
            port: port_path.to_string(),
            source,
        }
        .into()
    })
}

/// Drain stale data from a channel.
///
/// Reads and discards whatever arrives within `window`. With a zero window only
/// bytes that are immediately readable are discarded, which matches a UART
/// input-buffer reset. Read errors end the drain silently; the exchange that
/// follows will surface them.
///
/// Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + window;
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break, // nothing more within the window
        }
        if tokio::time::Instant::now() >= deadline && window > Duration::ZERO {
            break;
        }
    }

    total_discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_shared_port_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(device));

        host.write_all(b"@\r\n").await.unwrap();

        let mut guard = port.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();

        assert_eq!(line, "@\r\n");
    }

    #[tokio::test]
    async fn test_drain_serial_buffer_zero_window() {
        let (mut host, mut device) = tokio::io::duplex(64);

        host.write_all(b">stale 12345\r\n").await.unwrap();

        let discarded = drain_serial_buffer(&mut device, Duration::ZERO).await;
        assert_eq!(discarded, 14);

        // Nothing left to read
        let mut buf = [0u8; 1];
        let res = tokio::time::timeout(Duration::from_millis(10), device.read(&mut buf)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_drain_serial_buffer_empty() {
        let (_host, mut device) = tokio::io::duplex(64);
        let discarded = drain_serial_buffer(&mut device, Duration::from_millis(5)).await;
        assert_eq!(discarded, 0);
    }
}
