//! Mock serial port for testing the console link without hardware
//!
//! This module provides `MockSerialPort`, which implements `AsyncRead` and `AsyncWrite`,
//! and a corresponding `MockDeviceHarness` to play the console's side from within tests.
//! On top of the raw harness, [`spawn_console`] runs a scripted RemCon32 console that
//! answers a fixed list of requests with ack/data line pairs.
//!
//! # Architecture
//!
//! Two unbounded channels carry the bytes in each direction:
//! - `MockSerialPort` (given to the client): implements AsyncRead/AsyncWrite
//! - `MockDeviceHarness` (kept in test): scripts console behavior
//!
//! # Example
//!
//! ```rust,ignore
//! use sem_remcon::hardware::mock_serial::{self, ScriptedExchange};
//!
//! let (port, harness) = mock_serial::new();
//! let console = mock_serial::spawn_console(harness, vec![
//!     ScriptedExchange::ok("mag?", "500.0"),
//! ]);
//! let client = RemconClient::new(wrap_shared(Box::new(port)), ClientConfig::default());
//! assert_eq!(client.get_mag().await?, 500.0);
//! console.await?;
//! ```

#![allow(clippy::panic, clippy::expect_used)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Client end of the mock link, handed to `RemconClient`
#[derive(Debug)]
pub struct MockSerialPort {
    /// Request bytes, towards the console side
    writes_tx: UnboundedSender<Vec<u8>>,
    /// Reply bytes, from the console side
    reads_rx: UnboundedReceiver<Vec<u8>>,
    /// Reply bytes not yet handed to the reader
    read_buffer: VecDeque<u8>,
}

/// Console end of the mock link, driven by the test
#[derive(Debug)]
pub struct MockDeviceHarness {
    /// Request bytes written by the client
    writes_rx: UnboundedReceiver<Vec<u8>>,
    /// Reply bytes for the client to read
    reads_tx: UnboundedSender<Vec<u8>>,
    /// Request bytes not yet matched by an expectation
    write_buffer: Vec<u8>,
}

/// A connected client port and console harness.
pub fn new() -> (MockSerialPort, MockDeviceHarness) {
    let (client_to_harness_tx, client_to_harness_rx) = mpsc::unbounded_channel();
    let (harness_to_client_tx, harness_to_client_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx: client_to_harness_tx,
        reads_rx: harness_to_client_rx,
        read_buffer: VecDeque::new(),
    };

    let harness = MockDeviceHarness {
        writes_rx: client_to_harness_rx,
        reads_tx: harness_to_client_tx,
        write_buffer: Vec::new(),
    };

    (port, harness)
}

// =============================================================================
// MockSerialPort Implementations
// =============================================================================

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_buffer.is_empty() {
            match self.reads_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.read_buffer.extend(chunk),
                // Harness dropped: end-of-file
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let to_read = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(_) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock device harness disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// =============================================================================
// MockDeviceHarness Implementations
// =============================================================================

impl MockDeviceHarness {
    /// Sends raw bytes to the client, as if the console had transmitted them.
    ///
    /// # Errors
    /// Returns error if the client port has been dropped
    pub fn send_response(&self, data: &[u8]) -> Result<(), &'static str> {
        self.reads_tx
            .send(data.to_vec())
            .map_err(|_| "Failed to send response: client port disconnected")
    }

    /// Sends an ack line followed by a data line, each terminated by CRLF.
    pub fn send_frame(&self, ack: &str, data: &str) -> Result<(), &'static str> {
        self.send_response(format!("{ack}\r\n{data}\r\n").as_bytes())
    }

    /// Waits until the client has written `expected` and asserts the bytes match.
    ///
    /// # Panics
    /// Panics if the expected data is not received within 2 seconds or if
    /// the received data does not match the expected data.
    pub async fn expect_write(&mut self, expected: &[u8]) {
        use tokio::time::{timeout, Duration};

        let timeout_duration = Duration::from_secs(2);

        while self.write_buffer.len() < expected.len() {
            match timeout(timeout_duration, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("client port dropped while a request was expected"),
                Err(_) => {
                    panic!(
                        "no request {:?} ({} bytes) within 2 s; got {:?} ({} bytes)",
                        String::from_utf8_lossy(expected),
                        expected.len(),
                        String::from_utf8_lossy(&self.write_buffer),
                        self.write_buffer.len()
                    );
                }
            }
        }

        let actual = &self.write_buffer[..expected.len()];
        assert_eq!(
            actual,
            expected,
            "request mismatch: expected {:?}, got {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        );

        self.write_buffer.drain(..expected.len());
    }

    /// [`expect_write`](Self::expect_write) followed by [`send_response`](Self::send_response).
    pub async fn expect_and_respond(&mut self, expected: &[u8], response: &[u8]) {
        self.expect_write(expected).await;
        self.send_response(response)
            .expect("client port dropped before the reply");
    }

    /// Collects whatever the client has written and not yet been asserted,
    /// waiting briefly for stragglers.
    pub async fn take_writes(&mut self) -> Vec<u8> {
        use tokio::time::{timeout, Duration};
        let short_timeout = Duration::from_millis(50);

        while let Ok(Some(chunk)) = timeout(short_timeout, self.writes_rx.recv()).await {
            self.write_buffer.extend_from_slice(&chunk);
        }
        std::mem::take(&mut self.write_buffer)
    }
}

// =============================================================================
// Scripted console
// =============================================================================

/// One request/response pair played by [`spawn_console`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedExchange {
    /// Request line the client must send, without the trailing `\r`.
    pub request: String,
    /// First response line, without CRLF.
    pub ack: String,
    /// Second response line, without CRLF.
    pub data: String,
}

impl ScriptedExchange {
    /// Success reply carrying `payload` (use `""` for a bare acknowledgement).
    pub fn ok(request: impl Into<String>, payload: &str) -> Self {
        Self {
            request: request.into(),
            ack: "@".to_string(),
            data: format!(">{payload}"),
        }
    }

    /// Numbered failure reply.
    pub fn error(request: impl Into<String>, code: i32) -> Self {
        Self {
            request: request.into(),
            ack: "#".to_string(),
            data: format!("* {code}"),
        }
    }

    /// Arbitrary reply lines.
    pub fn raw(request: impl Into<String>, ack: &str, data: &str) -> Self {
        Self {
            request: request.into(),
            ack: ack.to_string(),
            data: data.to_string(),
        }
    }
}

/// Runs a scripted console on a background task.
///
/// Each entry is played in order: wait for the request line, then answer with
/// the ack and data lines. The task hands the harness back when the script is
/// done, so tests can keep asserting on it.
///
/// # Panics
/// The spawned task panics (failing the test on join) if a request does not
/// match the script.
pub fn spawn_console(
    mut harness: MockDeviceHarness,
    script: Vec<ScriptedExchange>,
) -> JoinHandle<MockDeviceHarness> {
    tokio::spawn(async move {
        for step in script {
            let expected = format!("{}\r", step.request);
            harness.expect_write(expected.as_bytes()).await;
            harness
                .send_frame(&step.ack, &step.data)
                .expect("client dropped while console script was running");
        }
        harness
    })
}
