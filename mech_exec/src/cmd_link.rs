//! # Device command link
//!
//! Ties the line framer and the command decoder to the [`CmdStore`]. Every complete line
//! received from the host is decoded, valid commands are accepted into the store and invalid
//! ones are counted and dropped.
//!
//! The link also keeps a short diagnostic note which is attached to outgoing telemetry for a
//! limited time, so the host can see what the device made of its recent input.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io;

use comms_if::{
    cmd::CmdFrame,
    link::{send_line, LineFramer, Port, RxStats},
    tlm::TlmFrame,
};
use log::{debug, warn};

use crate::cmd_store::CmdStore;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum length of a note in characters.
pub const NOTE_MAX_CHARS: usize = 96;

/// How long a note stays attached to telemetry.
pub const NOTE_EXPIRY_MS: u64 = 1500;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct CmdLink {
    framer: LineFramer,
    store: CmdStore,
    note: Option<Note>,
    stats: CmdRxStats,
}

/// Decode statistics for the command link.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CmdRxStats {
    /// Lines which decoded into a valid command.
    pub ok: u64,

    /// Non-empty lines which failed to decode.
    pub fail: u64,
}

#[derive(Debug, Clone)]
struct Note {
    text: String,
    set_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdLink {
    /// Create a new link with a receive buffer of `rx_buf_size` bytes.
    pub fn new(rx_buf_size: usize, now_ms: u64) -> Self {
        let mut link = Self {
            framer: LineFramer::new(rx_buf_size),
            store: CmdStore::new(),
            note: None,
            stats: CmdRxStats::default(),
        };

        link.set_note(format!("BOOT RX_BUF_SIZE={}", rx_buf_size), now_ms);

        link
    }

    /// Read and decode everything the port currently has available.
    ///
    /// Returns the number of valid commands accepted.
    pub fn rx_tick<P>(&mut self, port: &mut P, now_ms: u64) -> io::Result<usize>
    where
        P: Port + ?Sized,
    {
        let Self {
            framer,
            store,
            note,
            stats,
        } = self;

        let overflows_before = framer.stats().overflows;
        let mut num_accepted = 0;

        framer.poll(port, |line| {
            // Keep-alive blank lines carry nothing
            if line.is_empty() {
                return;
            }

            let decoded = std::str::from_utf8(line)
                .map_err(|e| e.to_string())
                .and_then(|s| CmdFrame::from_json(s).map_err(|e| e.to_string()));

            match decoded {
                Ok(cmd) => {
                    stats.ok += 1;
                    num_accepted += 1;
                    *note = Some(Note::new(
                        format!("RX OK seq={} len={}", cmd.seq, line.len()),
                        now_ms,
                    ));
                    debug!("Command {} accepted ({} bytes)", cmd.seq, line.len());
                    store.accept(cmd, now_ms);
                }
                Err(e) => {
                    stats.fail += 1;
                    warn!("Discarding malformed command line: {}", e);
                    *note = Some(Note::new(format!("RX FAIL {}", e), now_ms));
                }
            }
        })?;

        let overflows = framer.stats().overflows;
        if overflows > overflows_before {
            warn!(
                "Receive buffer overflowed, {} line(s) dropped",
                overflows - overflows_before
            );
            let capacity = self.framer.capacity();
            self.set_note(
                format!("RX OVERFLOW cap={} count={}", capacity, overflows),
                now_ms,
            );
        }

        Ok(num_accepted)
    }

    /// Send one telemetry frame.
    pub fn send_tlm<P>(&self, port: &mut P, tlm: &TlmFrame) -> io::Result<()>
    where
        P: Port + ?Sized,
    {
        send_line(port, &tlm.to_json_line())
    }

    /// Set the diagnostic note, truncating it if needed.
    pub fn set_note<S: Into<String>>(&mut self, text: S, now_ms: u64) {
        self.note = Some(Note::new(text.into(), now_ms));
    }

    /// The current note, or `None` if there isn't one or it has expired.
    pub fn note(&self, now_ms: u64) -> Option<&str> {
        self.note
            .as_ref()
            .filter(|n| now_ms.saturating_sub(n.set_ms) < NOTE_EXPIRY_MS)
            .map(|n| n.text.as_str())
    }

    pub fn store(&self) -> &CmdStore {
        &self.store
    }

    pub fn stats(&self) -> CmdRxStats {
        self.stats
    }

    pub fn framer_stats(&self) -> RxStats {
        self.framer.stats()
    }
}

impl Note {
    fn new(mut text: String, set_ms: u64) -> Self {
        if let Some((idx, _)) = text.char_indices().nth(NOTE_MAX_CHARS) {
            text.truncate(idx);
        }

        Self { text, set_ms }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::link::MemPort;

    const CMD: &str = "{\"type\":\"cmd\",\"seq\":5,\"host_time_ms\":1000,\
        \"drive\":{\"linear\":0.5,\"angular\":0.0},\
        \"mech\":{\"motor_RHS\":null,\"motor_LHS\":null,\"servo_LID_deg\":80,\"servo_SWEEP_deg\":null}}\n";

    #[test]
    fn test_valid_command_accepted() {
        let mut port = MemPort::new();
        let mut link = CmdLink::new(512, 0);

        assert_eq!(link.note(0), Some("BOOT RX_BUF_SIZE=512"));

        port.inject(CMD.as_bytes());
        assert_eq!(link.rx_tick(&mut port, 100).unwrap(), 1);

        assert_eq!(link.store().latest().map(|c| c.seq), Some(5));
        assert!(!link.store().is_stale(100, 250));
        assert_eq!(link.stats(), CmdRxStats { ok: 1, fail: 0 });
        let expected = format!("RX OK seq=5 len={}", CMD.len() - 1);
        assert_eq!(link.note(100), Some(expected.as_str()));
    }

    #[test]
    fn test_overflow_recovery() {
        let mut port = MemPort::new();
        let mut link = CmdLink::new(256, 0);

        // A line longer than the buffer, then a good command
        let mut bytes = vec![b'{'; 300];
        bytes.push(b'\n');
        bytes.extend_from_slice(CMD.as_bytes());
        port.inject(&bytes);

        assert_eq!(link.rx_tick(&mut port, 10).unwrap(), 1);
        assert_eq!(link.framer_stats().overflows, 1);
        assert_eq!(link.stats(), CmdRxStats { ok: 1, fail: 0 });
        assert_eq!(link.store().latest().map(|c| c.seq), Some(5));
        assert!(link.note(10).unwrap_or("").starts_with("RX OVERFLOW"));
    }

    #[test]
    fn test_malformed_lines_counted() {
        let mut port = MemPort::new();
        let mut link = CmdLink::new(256, 0);

        port.inject(b"\n\r\n{\"type\":\"cmd\",\"seq\":1}\nnot json\n\xff\xfe\n");

        assert_eq!(link.rx_tick(&mut port, 0).unwrap(), 0);
        assert_eq!(link.stats(), CmdRxStats { ok: 0, fail: 3 });
        assert!(link.store().latest().is_none());
        assert!(link.note(0).unwrap_or("").starts_with("RX FAIL"));
    }

    #[test]
    fn test_note_expiry_and_truncation() {
        let mut link = CmdLink::new(64, 0);

        link.set_note("x".repeat(200), 1000);
        assert_eq!(link.note(1000).map(|n| n.chars().count()), Some(NOTE_MAX_CHARS));
        assert!(link.note(2499).is_some());
        assert!(link.note(2500).is_none());
    }

    #[test]
    fn test_send_tlm() {
        let (mut dev, mut host) = MemPort::pair();
        let link = CmdLink::new(64, 0);

        let tlm = TlmFrame {
            device_time_ms: 20,
            ack_seq: 3,
            ..Default::default()
        };
        link.send_tlm(&mut dev, &tlm).unwrap();

        let mut rx = Vec::new();
        let mut framer = LineFramer::new(1024);
        framer
            .poll(&mut host, |l| rx.push(String::from_utf8_lossy(l).into_owned()))
            .unwrap();

        assert_eq!(rx.len(), 1);
        assert_eq!(TlmFrame::from_json(&rx[0]).unwrap().ack_seq, 3);
    }
}
