//! RemCon32 protocol client.
//!
//! [`RemconClient`] owns the byte channel and runs one request/response exchange
//! at a time. Each exchange:
//!
//! 1. discards anything left unread from earlier traffic (the resync step)
//! 2. writes `<verb> [params]\r` and flushes
//! 3. reads the ack line and the data line, each under its own read timeout
//! 4. interprets the pair with [`ResponseFrame::interpret`]
//!
//! Nothing is retried. Resending an accepted command could apply a relative
//! move or a macro twice, so retry policy belongs to the caller.
//!
//! Typed methods below are thin wrappers over [`RemconClient::send`], one per
//! console verb. Setters clamp their parameters when the [`Command`] is encoded.
//!
//! # Example
//!
//! ```rust,ignore
//! use sem_remcon::remcon::{ClientConfig, RemconClient};
//!
//! let client = RemconClient::from_stream(port, ClientConfig::default());
//! client.set_kv(3.0).await?;
//! let kv = client.get_kv().await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, instrument, trace, warn};

use crate::error::{ChannelError, SemError, SemResult};
use crate::hardware::serial::{drain_serial_buffer, wrap_shared, DynSerial, SerialPortIO, SharedPort};
use crate::remcon::command::{Command, Display, Macro, ProbeCurrent, StageTarget};
use crate::remcon::decode;
use crate::remcon::frame::ResponseFrame;

/// Brightness both displays are set to by [`RemconClient::initialize_detectors`].
pub const NEUTRAL_BRIGHTNESS: f64 = 50.0;

/// Timing of a single exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on each of the two line reads.
    pub read_timeout: Duration,
    /// How long the resync step keeps discarding incoming bytes. Zero discards
    /// only what is already readable.
    pub flush_window: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(500),
            flush_window: Duration::ZERO,
        }
    }
}

impl From<&crate::config::SerialConfig> for ClientConfig {
    fn from(serial: &crate::config::SerialConfig) -> Self {
        Self {
            read_timeout: serial.read_timeout,
            flush_window: serial.flush_window,
        }
    }
}

/// Client for the RemCon32 console.
///
/// Sole owner of the channel. The internal mutex serializes exchanges, so a
/// client can be shared behind an `Arc` between tasks. Multi-command sequences
/// (display-focused operations, stage moves) are not atomic with respect to
/// other tasks using the same client.
pub struct RemconClient {
    port: SharedPort,
    config: ClientConfig,
    closed: AtomicBool,
}

impl std::fmt::Debug for RemconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemconClient")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl RemconClient {
    /// Client over an already-open shared channel.
    pub fn new(port: SharedPort, config: ClientConfig) -> Self {
        Self {
            port,
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Client over any duplex byte stream.
    pub fn from_stream<S: SerialPortIO + 'static>(stream: S, config: ClientConfig) -> Self {
        let boxed: DynSerial = Box::new(stream);
        Self::new(wrap_shared(boxed), config)
    }

    /// Open the configured serial port and wrap it in a client.
    #[cfg(feature = "serial")]
    pub async fn open(config: &crate::config::RemconConfig) -> SemResult<Self> {
        let serial = &config.serial;
        let stream =
            crate::hardware::serial::open_serial_async(&serial.port, serial.baud_rate).await?;
        debug!(port = %serial.port, baud = serial.baud_rate, "Opened console port");
        Ok(Self::from_stream(stream, ClientConfig::from(serial)))
    }

    /// Exchange timing in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut the channel down. Later exchanges fail with [`ChannelError::Closed`].
    pub async fn close(&self) -> SemResult<()> {
        let mut guard = self.port.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        guard
            .get_mut()
            .shutdown()
            .await
            .map_err(ChannelError::Write)?;
        debug!("Console channel closed");
        Ok(())
    }

    /// Run one exchange. Failure frames become errors.
    pub async fn send(&self, command: &Command) -> SemResult<Option<String>> {
        self.exchange(command, false).await
    }

    /// Run one exchange. A failure frame yields its raw data line instead of an
    /// error; channel errors still propagate.
    pub async fn send_tolerant(&self, command: &Command) -> SemResult<Option<String>> {
        self.exchange(command, true).await
    }

    #[instrument(level = "debug", skip(self, command), fields(command = %command))]
    async fn exchange(&self, command: &Command, error_tolerant: bool) -> SemResult<Option<String>> {
        command.validate()?;
        let wire = command.encode();
        let mut guard = self.port.lock().await;
        if self.is_closed() {
            return Err(ChannelError::Closed.into());
        }

        let port: &mut BufReader<DynSerial> = &mut guard;

        let buffered = port.buffer().len();
        if buffered > 0 {
            port.consume(buffered);
        }
        let stale = buffered + drain_serial_buffer(port.get_mut(), self.config.flush_window).await;
        if stale > 0 {
            debug!(bytes = stale, "Discarded stale input before request");
        }

        trace!(request = %wire, "-> console");
        let writer = port.get_mut();
        writer
            .write_all(format!("{wire}\r").as_bytes())
            .await
            .map_err(ChannelError::Write)?;
        writer.flush().await.map_err(ChannelError::Write)?;

        let ack = read_line(port, self.config.read_timeout).await?;
        let data = read_line(port, self.config.read_timeout).await?;
        drop(guard);

        let frame = ResponseFrame::from_bytes(&ack, &data);
        trace!(ack = ?frame.ack, data = ?frame.data, "<- console");

        let result = frame.interpret(&wire, error_tolerant);
        match &result {
            Err(err @ SemError::Remcon { .. }) => warn!(request = %wire, "{err}"),
            Err(err @ SemError::ProtocolViolation { .. }) => warn!("{err}"),
            Ok(Some(raw)) if error_tolerant && !frame.is_success() => {
                debug!(request = %wire, raw = ?raw, "Tolerated failure reply")
            }
            _ => {}
        }
        result
    }

    async fn query(&self, command: Command) -> SemResult<String> {
        let reply = self.send(&command).await?;
        decode::require(&command.encode(), reply.as_deref()).map(str::to_string)
    }

    async fn query_f64(&self, command: Command) -> SemResult<f64> {
        let payload = self.query(command.clone()).await?;
        decode::parse_f64(&command.encode(), &payload)
    }

    async fn query_flag(&self, command: Command) -> SemResult<bool> {
        let payload = self.query(command.clone()).await?;
        decode::parse_flag(&command.encode(), &payload)
    }

    async fn query_pair(&self, command: Command) -> SemResult<(f64, f64)> {
        let payload = self.query(command.clone()).await?;
        decode::parse_pair(&command.encode(), &payload)
    }

    async fn execute(&self, command: Command) -> SemResult<()> {
        self.send(&command).await.map(|_| ())
    }

    // ---------------------------------------------------------------------
    // Beam
    // ---------------------------------------------------------------------

    /// Actual accelerating voltage in kV.
    pub async fn get_kv(&self) -> SemResult<f64> {
        self.query_f64(Command::GetKv).await
    }

    /// Request an accelerating voltage, clamped to [0, 30] kV.
    ///
    /// Acceptance is immediate; the voltage converges over seconds. Poll
    /// [`get_kv`](Self::get_kv) if convergence matters.
    pub async fn set_kv(&self, kv: f64) -> SemResult<()> {
        self.execute(Command::SetKv(kv)).await
    }

    /// EHT on (also starts the gun if needed) or off.
    pub async fn set_eht_state(&self, on: bool) -> SemResult<()> {
        self.execute(Command::SetEht(on)).await
    }

    /// EHT counts as on while the actual voltage is above zero.
    pub async fn get_eht_state(&self) -> SemResult<bool> {
        Ok(self.get_kv().await? > 0.0)
    }

    /// Beam blanking.
    pub async fn set_blank_state(&self, blanked: bool) -> SemResult<()> {
        self.execute(Command::SetBlank(blanked)).await
    }

    /// Beam blanking.
    pub async fn get_blank_state(&self) -> SemResult<bool> {
        self.query_flag(Command::GetBlank).await
    }

    /// Stigmator x/y in percent, clamped to ±100.
    pub async fn set_stig(&self, x: f64, y: f64) -> SemResult<()> {
        self.execute(Command::SetStig { x, y }).await
    }

    /// Stigmator x/y in percent.
    pub async fn get_stig(&self) -> SemResult<(f64, f64)> {
        self.query_pair(Command::GetStig).await
    }

    /// Select aperture slot, clamped to 1..=6.
    pub async fn set_aperture(&self, slot: i32) -> SemResult<()> {
        self.execute(Command::SetAperture(slot)).await
    }

    /// Selected aperture slot.
    pub async fn get_aperture(&self) -> SemResult<i32> {
        let command = Command::GetAperture;
        let payload = self.query(command.clone()).await?;
        let slot = decode::parse_i64(&command.encode(), &payload)?;
        i32::try_from(slot)
            .map_err(|_| SemError::decode(command.encode(), payload, "aperture slot out of range"))
    }

    /// Alignment of the selected aperture in percent, clamped to ±100.
    pub async fn set_aperture_align(&self, x: f64, y: f64) -> SemResult<()> {
        self.execute(Command::SetApertureAlign { x, y }).await
    }

    /// Alignment of the selected aperture in percent.
    pub async fn get_aperture_align(&self) -> SemResult<(f64, f64)> {
        self.query_pair(Command::GetApertureAlign).await
    }

    /// Gun alignment in percent, clamped to ±100. The console has no matching query.
    pub async fn set_gun_align(&self, x: f64, y: f64) -> SemResult<()> {
        self.execute(Command::SetGunAlign { x, y }).await
    }

    /// Beam shift in percent, clamped to ±100 and sent as ±1.
    pub async fn set_beam_shift(&self, x: f64, y: f64) -> SemResult<()> {
        self.execute(Command::SetBeamShift { x, y }).await
    }

    /// Run a numbered console macro.
    pub async fn run_macro(&self, m: Macro) -> SemResult<()> {
        self.execute(Command::RunMacro(m)).await
    }

    /// Specimen current monitor (the stage interlock).
    pub async fn set_scm_state(&self, on: bool) -> SemResult<()> {
        self.execute(Command::SetScm(on)).await
    }

    /// Specimen current in amps.
    ///
    /// `prb?` fails with 614 while the monitor is off. That reply, and any other
    /// non-numeric reply, reads as `0.0`. Channel errors still propagate.
    pub async fn get_scm(&self) -> SemResult<f64> {
        let reply = self.send_tolerant(&Command::GetProbeCurrent).await?;
        match reply.as_deref().map(str::trim).map(str::parse::<f64>) {
            Some(Ok(amps)) => Ok(amps),
            _ => {
                debug!(reply = ?reply, "Specimen current unavailable, reading 0.0");
                Ok(0.0)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Detectors and scanning
    // ---------------------------------------------------------------------

    /// Brightness of the focused display, clamped to 0..=100.
    pub async fn set_brightness(&self, percent: f64) -> SemResult<()> {
        self.execute(Command::SetBrightness(percent)).await
    }

    /// Brightness of the focused display.
    pub async fn get_brightness(&self) -> SemResult<f64> {
        self.query_f64(Command::GetBrightness).await
    }

    /// Contrast of the focused display, clamped to 0..=100.
    pub async fn set_contrast(&self, percent: f64) -> SemResult<()> {
        self.execute(Command::SetContrast(percent)).await
    }

    /// Contrast of the focused display.
    pub async fn get_contrast(&self) -> SemResult<f64> {
        self.query_f64(Command::GetContrast).await
    }

    /// Detector of the focused display.
    pub async fn set_detector(&self, name: &str) -> SemResult<()> {
        self.execute(Command::SetDetector(name.to_string())).await
    }

    /// Detector of the focused display.
    pub async fn get_detector(&self) -> SemResult<String> {
        self.query(Command::GetDetector)
            .await
            .map(|name| name.trim().to_string())
    }

    /// Unfreeze both displays and leave spot mode.
    pub async fn set_norm(&self) -> SemResult<()> {
        self.execute(Command::Normal).await
    }

    /// External scan.
    pub async fn set_extscan_state(&self, on: bool) -> SemResult<()> {
        self.execute(Command::SetExtScan(on)).await
    }

    /// External scan.
    pub async fn get_extscan_state(&self) -> SemResult<bool> {
        self.query_flag(Command::GetExtScan).await
    }

    /// Magnification, clamped to 5..=1e6.
    pub async fn set_mag(&self, mag: f64) -> SemResult<()> {
        self.execute(Command::SetMag(mag)).await
    }

    /// Magnification.
    pub async fn get_mag(&self) -> SemResult<f64> {
        self.query_f64(Command::GetMag).await
    }

    /// Working distance in mm, clamped to 0..=50.
    pub async fn set_wd(&self, mm: f64) -> SemResult<()> {
        self.execute(Command::SetWorkingDistance(mm)).await
    }

    /// Working distance in mm.
    pub async fn get_wd(&self) -> SemResult<f64> {
        self.query_f64(Command::GetWorkingDistance).await
    }

    /// Pixel size in meters. The console reports nanometers.
    pub async fn get_pixel_size(&self) -> SemResult<f64> {
        Ok(self.query_f64(Command::GetPixelSize).await? * 1e-9)
    }

    /// Spot mode at scan pixel (x, y), clamped to the 1024x768 raster.
    pub async fn set_spot_mode(&self, x: i32, y: i32) -> SemResult<()> {
        self.execute(Command::SetSpot { x, y }).await
    }

    // ---------------------------------------------------------------------
    // Stage
    // ---------------------------------------------------------------------

    /// Stage pose from `c95?`.
    pub async fn get_stage_pose(&self) -> SemResult<crate::stage::StagePose> {
        let command = Command::GetStagePose;
        let payload = self.query(command.clone()).await?;
        crate::stage::StagePose::parse(&command.encode(), &payload)
    }

    /// Stage initialisation. `ist?` answers `<type> <status>`, status 0 meaning
    /// initialised.
    pub async fn get_stage_initialized(&self) -> SemResult<bool> {
        let command = Command::GetStageInit;
        let payload = self.query(command.clone()).await?;
        match decode::parse_ints(&command.encode(), &payload)?.as_slice() {
            [_, status, ..] => Ok(*status == 0),
            _ => Err(SemError::decode(
                command.encode(),
                payload,
                "expected stage type and status",
            )),
        }
    }

    /// Raw absolute stage move. Leaves the interlock alone; out-of-range
    /// targets fail with code 603.
    pub async fn move_stage_absolute(&self, target: StageTarget) -> SemResult<Option<String>> {
        self.send(&Command::MoveStage(target)).await
    }

    // ---------------------------------------------------------------------
    // Macro-backed operations
    // ---------------------------------------------------------------------

    /// Move the console's display focus.
    pub async fn set_display_focus(&self, display: Display) -> SemResult<()> {
        self.run_macro(display.focus_macro()).await
    }

    /// Focus `display`, run `op`, then return focus to the primary display
    /// whatever `op` returned. The error from `op` wins over a restore failure.
    async fn on_display<T, F, Fut>(&self, display: Display, op: F) -> SemResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SemResult<T>>,
    {
        self.set_display_focus(display).await?;
        let result = op().await;
        let restore = self.set_display_focus(Display::Primary).await;
        let value = result?;
        restore?;
        Ok(value)
    }

    /// Brightness of one display.
    pub async fn set_channel_brightness(&self, percent: f64, display: Display) -> SemResult<()> {
        self.on_display(display, || self.set_brightness(percent)).await
    }

    /// Brightness of one display.
    pub async fn get_channel_brightness(&self, display: Display) -> SemResult<f64> {
        self.on_display(display, || self.get_brightness()).await
    }

    /// Contrast of one display.
    pub async fn set_channel_contrast(&self, percent: f64, display: Display) -> SemResult<()> {
        self.on_display(display, || self.set_contrast(percent)).await
    }

    /// Contrast of one display.
    pub async fn get_channel_contrast(&self, display: Display) -> SemResult<f64> {
        self.on_display(display, || self.get_contrast()).await
    }

    /// Detector of one display.
    pub async fn set_channel_detector(&self, name: &str, display: Display) -> SemResult<()> {
        // Reject before the focus macro goes out
        Command::SetDetector(name.to_string()).validate()?;
        self.on_display(display, || self.set_detector(name)).await
    }

    /// Detector of one display.
    pub async fn get_channel_detector(&self, display: Display) -> SemResult<String> {
        self.on_display(display, || self.get_detector()).await
    }

    /// Dual monitor mode.
    pub async fn set_dual_channel(&self, on: bool) -> SemResult<()> {
        let m = if on {
            Macro::DualMonitorOn
        } else {
            Macro::DualMonitorOff
        };
        self.run_macro(m).await
    }

    /// High current mode. Not available on Auger consoles.
    pub async fn set_high_current(&self, on: bool) -> SemResult<()> {
        let m = if on {
            Macro::HighCurrentOn
        } else {
            Macro::HighCurrentOff
        };
        self.run_macro(m).await
    }

    /// Auger probe current preset.
    pub async fn set_probe_current(&self, preset: ProbeCurrent) -> SemResult<()> {
        self.run_macro(preset.preset_macro()).await
    }

    /// Connect-time detector setup: both displays to neutral brightness.
    #[instrument(level = "debug", skip(self))]
    pub async fn initialize_detectors(&self) -> SemResult<()> {
        self.set_channel_brightness(NEUTRAL_BRIGHTNESS, Display::Primary)
            .await?;
        self.set_channel_brightness(NEUTRAL_BRIGHTNESS, Display::Secondary)
            .await
    }
}

/// Read one CRLF-terminated line under `timeout`.
async fn read_line(port: &mut BufReader<DynSerial>, timeout: Duration) -> SemResult<Vec<u8>> {
    let mut line = Vec::new();
    match tokio::time::timeout(timeout, port.read_until(b'\n', &mut line)).await {
        Err(_) => Err(ChannelError::Timeout(timeout).into()),
        Ok(Err(e)) => Err(ChannelError::Read(e).into()),
        // EOF, or EOF in the middle of a line
        Ok(Ok(0)) => Err(ChannelError::Closed.into()),
        Ok(Ok(_)) if line.last() != Some(&b'\n') => Err(ChannelError::Closed.into()),
        Ok(Ok(_)) => Ok(line),
    }
}
