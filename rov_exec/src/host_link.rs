//! # Host link
//!
//! Host end of the serial link to the device. The link owns the port and reopens it when it is
//! lost, decodes telemetry coming up from the device, and sends one command frame per transmit
//! tick once the device has been heard from.
//!
//! Usage in a control loop:
//! 1. [`HostLink::rx_tick`] early in the cycle
//! 2. read [`HostLink::latest_telemetry`]
//! 3. [`HostLink::tx_tick`] late in the cycle

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{io, time::Duration};

use comms_if::{
    cmd::{CmdFrame, Demand},
    link::{
        send_line,
        tokio_serial::{self, ClearBuffer, SerialPort, SerialPortType},
        LineFramer, Port,
    },
    tlm::TlmFrame,
};
use log::{debug, info, trace, warn};
use serde::Deserialize;
use util::{maths::ema, time::wall_clock_ms};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Substrings of a port's name or description which suggest a USB serial adapter.
pub const PORT_HINTS: [&str; 9] = [
    "Arduino",
    "CH340",
    "CP210",
    "FTDI",
    "USB Serial",
    "ttyACM",
    "ttyUSB",
    "usbmodem",
    "usbserial",
];

/// Read timeout of an opened serial port.
const SERIAL_TIMEOUT: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Opens the port the link runs over.
pub trait PortOpener {
    type Port: Port;

    /// Open the given device.
    ///
    /// The returned port must not hold any input received before the call.
    fn open(&mut self, device: &str, baud: u32) -> Result<Self::Port, HostLinkError>;

    /// Find a device to open when none is configured.
    fn detect(&mut self) -> Option<String>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct HostLinkConfig {
    /// Device to open. If not given the port is found automatically when `auto_detect` is set.
    #[serde(default)]
    pub device: Option<String>,

    pub auto_detect: bool,

    pub baud: u32,

    /// Longest telemetry line accepted.
    ///
    /// Units: bytes
    pub rx_buf_size: usize,

    /// Telemetry older than this makes the link stale.
    ///
    /// Units: milliseconds
    pub rx_stale_ms: u64,

    /// Minimum time between attempts to open the port.
    ///
    /// Units: milliseconds
    pub reconnect_ms: u64,

    /// Smoothing factor of the measured rates.
    pub hz_alpha: f64,
}

/// Health and counters of the link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStats {
    pub state: LinkState,

    /// Device the link is (or was last) using.
    pub port: Option<String>,
    pub baud: u32,

    pub bytes_rx: u64,
    pub bytes_tx: u64,

    /// Telemetry lines which failed to decode.
    pub rx_fail: u64,

    /// Sequence number of the last command sent.
    pub tx_seq: u64,

    /// Acknowledged sequence number in the latest telemetry.
    pub last_ack_seq: Option<u64>,

    pub last_rx_ms: Option<u64>,
    pub last_tx_ms: Option<u64>,

    pub last_error: Option<String>,

    /// Measured call rate of [`HostLink::rx_tick`].
    ///
    /// Units: Hertz
    pub rx_tick_hz: Option<f64>,

    /// Measured call rate of [`HostLink::tx_tick`].
    ///
    /// Units: Hertz
    pub tx_tick_hz: Option<f64>,

    /// Measured telemetry receive rate.
    ///
    /// Units: Hertz
    pub rx_hz: Option<f64>,

    /// Measured command send rate.
    ///
    /// Units: Hertz
    pub tx_hz: Option<f64>,
}

/// A serial port found on the system.
#[derive(Debug, Clone, PartialEq)]
pub struct PortCandidate {
    pub device: String,
    pub description: String,
}

/// Opens real serial ports.
#[derive(Debug, Default)]
pub struct SerialOpener;

pub struct HostLink<O: PortOpener> {
    cfg: HostLinkConfig,
    opener: O,
    port: Option<O::Port>,
    framer: LineFramer,

    /// The first line after opening may be a fragment.
    discard_next_line: bool,

    latest: Option<TlmFrame>,
    stats: LinkStats,

    last_reconnect_ms: Option<u64>,
    last_rx_tick_ms: Option<u64>,
    last_tx_tick_ms: Option<u64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No port open.
    Disconnected,

    /// Port open (or being opened) but no telemetry received yet.
    Connecting,

    /// Telemetry is arriving.
    Connected,

    /// Port open but telemetry has stopped arriving.
    Stale,

    /// The port failed and has been closed, it will be reopened.
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum HostLinkError {
    #[error("Could not open {device}: {reason}")]
    Open { device: String, reason: String },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<O: PortOpener> HostLink<O> {
    /// Create a new link. Nothing is opened until the first tick.
    pub fn new(cfg: HostLinkConfig, opener: O) -> Self {
        let stats = LinkStats {
            state: LinkState::Disconnected,
            port: cfg.device.clone(),
            baud: cfg.baud,
            bytes_rx: 0,
            bytes_tx: 0,
            rx_fail: 0,
            tx_seq: 0,
            last_ack_seq: None,
            last_rx_ms: None,
            last_tx_ms: None,
            last_error: None,
            rx_tick_hz: None,
            tx_tick_hz: None,
            rx_hz: None,
            tx_hz: None,
        };

        Self {
            framer: LineFramer::new(cfg.rx_buf_size),
            cfg,
            opener,
            port: None,
            discard_next_line: false,
            latest: None,
            stats,
            last_reconnect_ms: None,
            last_rx_tick_ms: None,
            last_tx_tick_ms: None,
        }
    }

    /// Receive side of the cycle.
    ///
    /// Opens the port if needed, then decodes every complete telemetry line available.
    pub fn rx_tick(&mut self, now_ms: u64) {
        if let Some(hz) = event_hz(self.last_rx_tick_ms, now_ms) {
            self.stats.rx_tick_hz = Some(ema(self.stats.rx_tick_hz, hz, self.cfg.hz_alpha));
        }
        self.last_rx_tick_ms = Some(now_ms);

        if self.port.is_none() {
            self.maybe_reconnect(now_ms);
        }

        self.drain(now_ms);
        self.update_state(now_ms);
    }

    /// Transmit side of the cycle.
    ///
    /// Sends `demand` as the next command, unless no telemetry has been received since the port
    /// was opened or there is no demand. Returns true if a command was written.
    pub fn tx_tick(&mut self, now_ms: u64, demand: Option<&Demand>) -> bool {
        if let Some(hz) = event_hz(self.last_tx_tick_ms, now_ms) {
            self.stats.tx_tick_hz = Some(ema(self.stats.tx_tick_hz, hz, self.cfg.hz_alpha));
        }
        self.last_tx_tick_ms = Some(now_ms);

        if self.port.is_none() {
            self.maybe_reconnect(now_ms);
        }

        let sent = match demand {
            Some(d) if self.stats.last_rx_ms.is_some() => self.write_command(now_ms, d),
            _ => false,
        };

        self.update_state(now_ms);

        sent
    }

    /// Close the port. It will be reopened on the next tick once the reconnect interval allows.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed {}", self.stats.port.as_deref().unwrap_or("port"));
        }
        self.reset_connection();
        self.set_state(LinkState::Disconnected);
    }

    /// The most recently received telemetry.
    pub fn latest_telemetry(&self) -> Option<&TlmFrame> {
        self.latest.as_ref()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn state(&self) -> LinkState {
        self.stats.state
    }

    pub fn is_connected(&self) -> bool {
        self.stats.state == LinkState::Connected
    }

    /// Time since the last telemetry was received, `None` if there hasn't been any.
    pub fn rx_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.stats.last_rx_ms.map(|t| now_ms.saturating_sub(t))
    }

    fn maybe_reconnect(&mut self, now_ms: u64) {
        if let Some(t) = self.last_reconnect_ms {
            if now_ms.saturating_sub(t) < self.cfg.reconnect_ms {
                return;
            }
        }
        self.last_reconnect_ms = Some(now_ms);

        self.set_state(LinkState::Connecting);

        let device = match &self.cfg.device {
            Some(d) => Some(d.clone()),
            None if self.cfg.auto_detect => self.opener.detect(),
            None => None,
        };

        self.stats.port = device.clone();
        self.stats.baud = self.cfg.baud;

        let device = match device {
            Some(d) => d,
            None => {
                debug!("No serial port to open");
                self.set_state(LinkState::Disconnected);
                return;
            }
        };

        match self.opener.open(&device, self.cfg.baud) {
            Ok(port) => {
                info!("Opened {} at {} baud", device, self.cfg.baud);
                self.port = Some(port);
                self.framer.reset();
                self.discard_next_line = true;
                self.stats.last_error = None;
            }
            Err(e) => {
                warn!("{}", e);
                self.stats.last_error = Some(e.to_string());
                self.set_state(LinkState::Error);
            }
        }
    }

    fn drain(&mut self, now_ms: u64) {
        let port = match self.port.as_mut() {
            Some(p) => p,
            None => return,
        };

        let mut lines: Vec<Vec<u8>> = Vec::new();
        let result = self.framer.poll(port, |line| lines.push(line.to_vec()));

        for line in &lines {
            self.handle_line(line, now_ms);
        }

        match result {
            Ok(n) => self.stats.bytes_rx += n as u64,
            Err(e) => self.handle_io_error(e),
        }
    }

    fn handle_line(&mut self, line: &[u8], now_ms: u64) {
        if self.discard_next_line {
            self.discard_next_line = false;
            debug!("Discarded first line after opening ({} bytes)", line.len());
            return;
        }

        if line.is_empty() {
            return;
        }

        let decoded = std::str::from_utf8(line)
            .map_err(|e| e.to_string())
            .and_then(|s| TlmFrame::from_json(s).map_err(|e| e.to_string()));

        let tlm = match decoded {
            Ok(t) => t,
            Err(e) => {
                self.stats.rx_fail += 1;
                debug!("Discarding telemetry line: {}", e);
                return;
            }
        };

        if let Some(hz) = event_hz(self.stats.last_rx_ms, now_ms) {
            self.stats.rx_hz = Some(ema(self.stats.rx_hz, hz, self.cfg.hz_alpha));
        }
        self.stats.last_rx_ms = Some(now_ms);
        self.stats.last_ack_seq = Some(tlm.ack_seq);

        if let Some(note) = &tlm.note {
            if self.latest.as_ref().and_then(|t| t.note.as_ref()) != Some(note) {
                info!("Device: {}", note);
            }
        }

        trace!("Telemetry: {:?}", tlm);

        self.latest = Some(tlm);
    }

    fn write_command(&mut self, now_ms: u64, demand: &Demand) -> bool {
        let port = match self.port.as_mut() {
            Some(p) => p,
            None => return false,
        };

        self.stats.tx_seq += 1;
        let frame = CmdFrame::new(self.stats.tx_seq, wall_clock_ms(), demand);
        let line = frame.to_json_line();

        match send_line(port, &line) {
            Ok(()) => {
                self.stats.bytes_tx += line.len() as u64;

                if let Some(hz) = event_hz(self.stats.last_tx_ms, now_ms) {
                    self.stats.tx_hz = Some(ema(self.stats.tx_hz, hz, self.cfg.hz_alpha));
                }
                self.stats.last_tx_ms = Some(now_ms);

                trace!("Sent command {}", frame.seq);
                true
            }
            Err(e) => {
                self.handle_io_error(e);
                false
            }
        }
    }

    fn update_state(&mut self, now_ms: u64) {
        let state = if self.port.is_none() {
            if self.stats.last_error.is_some() {
                LinkState::Error
            } else {
                LinkState::Disconnected
            }
        } else {
            match self.rx_age_ms(now_ms) {
                None => LinkState::Connecting,
                Some(age) if age > self.cfg.rx_stale_ms => LinkState::Stale,
                Some(_) => LinkState::Connected,
            }
        };

        self.set_state(state);
    }

    fn handle_io_error(&mut self, e: io::Error) {
        warn!("Serial link error: {}", e);

        self.stats.last_error = Some(e.to_string());
        self.port = None;
        self.reset_connection();
        self.set_state(LinkState::Error);
    }

    /// Forget everything tied to the port that was just closed.
    fn reset_connection(&mut self) {
        self.framer.reset();
        self.discard_next_line = false;
        self.stats.last_rx_ms = None;
        self.stats.last_tx_ms = None;
        self.stats.rx_tick_hz = None;
        self.stats.tx_tick_hz = None;
        self.stats.rx_hz = None;
        self.stats.tx_hz = None;
        self.last_rx_tick_ms = None;
        self.last_tx_tick_ms = None;
    }

    fn set_state(&mut self, state: LinkState) {
        if self.stats.state != state {
            info!("Link {:?} -> {:?}", self.stats.state, state);
            self.stats.state = state;
        }
    }
}

impl PortOpener for SerialOpener {
    type Port = Box<dyn SerialPort>;

    fn open(&mut self, device: &str, baud: u32) -> Result<Self::Port, HostLinkError> {
        let port = tokio_serial::new(device, baud)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|e| HostLinkError::Open {
                device: device.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = port.clear(ClearBuffer::All) {
            warn!("Could not clear the buffers of {}: {}", device, e);
        }

        Ok(port)
    }

    fn detect(&mut self) -> Option<String> {
        let ports = match tokio_serial::available_ports() {
            Ok(p) => p,
            Err(e) => {
                warn!("Could not list serial ports: {}", e);
                return None;
            }
        };

        let candidates: Vec<PortCandidate> = ports
            .into_iter()
            .map(|p| {
                let description = match p.port_type {
                    SerialPortType::UsbPort(usb) => format!(
                        "{} {}",
                        usb.product.unwrap_or_default(),
                        usb.manufacturer.unwrap_or_default()
                    ),
                    SerialPortType::BluetoothPort => String::from("Bluetooth"),
                    SerialPortType::PciPort => String::from("PCI"),
                    SerialPortType::Unknown => String::new(),
                };

                PortCandidate {
                    device: p.port_name,
                    description,
                }
            })
            .collect();

        let selected = select_port(&candidates);
        if let Some(d) = &selected {
            info!("Auto-detected serial port {}", d);
        }

        selected
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Pick the first port which looks like a USB serial adapter, or failing that the first port.
pub fn select_port(candidates: &[PortCandidate]) -> Option<String> {
    candidates
        .iter()
        .find(|c| {
            let haystack = format!("{} {}", c.device, c.description);
            PORT_HINTS.iter().any(|h| haystack.contains(h))
        })
        .or_else(|| candidates.first())
        .map(|c| c.device.clone())
}

/// Instantaneous rate of an event given the time it last happened.
fn event_hz(last_ms: Option<u64>, now_ms: u64) -> Option<f64> {
    let dt_ms = now_ms.saturating_sub(last_ms?);

    if dt_ms == 0 {
        None
    } else {
        Some(1000.0 / dt_ms as f64)
    }
}
