//! # Line transport
//!
//! Frames travel as single lines of text terminated by `\n`. This module provides the receive
//! side framer, which turns an arbitrary byte stream into bounded lines, and the transmit helper.
//!
//! Both work over any [`Port`], which is implemented for real serial ports and for the in-memory
//! [`MemPort`] used in simulation and tests.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use tokio_serial;
use tokio_serial::SerialPort;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum number of bytes consumed by a single call to [`LineFramer::poll`].
pub const MAX_POLL_BYTES: usize = 4096;

/// Size of the stack buffer used when draining a port.
const READ_CHUNK: usize = 256;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A byte stream which can report how much input is waiting without blocking.
pub trait Port: Read + Write {
    /// Number of bytes which can be read right now without waiting.
    fn bytes_available(&mut self) -> io::Result<usize>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Splits an incoming byte stream into lines of bounded length.
///
/// Lines longer than the capacity are dropped in their entirety, the framer then waits for the
/// next `\n` before accepting anything again. Carriage returns are always discarded.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    capacity: usize,
    state: RxState,
    stats: RxStats,
}

/// Receive statistics kept by a [`LineFramer`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RxStats {
    /// Number of complete lines delivered.
    pub lines: u64,

    /// Number of lines dropped because they didn't fit in the buffer.
    pub overflows: u64,

    /// Longest line delivered so far, in bytes.
    pub max_len_seen: usize,
}

/// One end of an in-memory serial link.
///
/// Cloning gives another handle onto the same end. Use [`MemPort::pair`] to get two connected
/// ends, or [`MemPort::new`] for a single end whose peer is driven with
/// [`MemPort::inject`]/[`MemPort::take_written`].
#[derive(Debug, Clone, Default)]
pub struct MemPort {
    rx: Arc<Mutex<VecDeque<u8>>>,
    tx: Arc<Mutex<VecDeque<u8>>>,
    broken: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum RxState {
    Accumulating,
    Dropping,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LineFramer {
    /// Create a framer which delivers lines of up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            state: RxState::Accumulating,
            stats: RxStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> RxStats {
        self.stats
    }

    /// Push bytes through the framer, calling `on_line` for each completed line.
    ///
    /// The line passed to `on_line` excludes the terminator. Returns the number of lines
    /// completed.
    pub fn feed<F>(&mut self, bytes: &[u8], mut on_line: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        let mut num_lines = 0;

        for &b in bytes {
            if b == b'\r' {
                continue;
            }

            match self.state {
                RxState::Accumulating => {
                    if b == b'\n' {
                        self.stats.lines += 1;
                        self.stats.max_len_seen = self.stats.max_len_seen.max(self.buf.len());
                        num_lines += 1;

                        on_line(&self.buf);
                        self.buf.clear();
                    } else if self.buf.len() < self.capacity {
                        self.buf.push(b);
                    } else {
                        self.stats.overflows += 1;
                        self.buf.clear();
                        self.state = RxState::Dropping;
                    }
                }
                RxState::Dropping => {
                    if b == b'\n' {
                        self.state = RxState::Accumulating;
                    }
                }
            }
        }

        num_lines
    }

    /// Drain whatever the port has available right now, without waiting for more.
    ///
    /// At most [`MAX_POLL_BYTES`] are consumed per call. Returns the number of bytes read.
    pub fn poll<P, F>(&mut self, port: &mut P, mut on_line: F) -> io::Result<usize>
    where
        P: Port + ?Sized,
        F: FnMut(&[u8]),
    {
        let mut remaining = port.bytes_available()?.min(MAX_POLL_BYTES);
        let mut total = 0;
        let mut chunk = [0u8; READ_CHUNK];

        while remaining > 0 {
            let want = remaining.min(READ_CHUNK);

            let n = match port.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if is_transient(&e) => break,
                Err(e) => return Err(e),
            };

            self.feed(&chunk[..n], &mut on_line);
            remaining -= n;
            total += n;
        }

        Ok(total)
    }

    /// Discard any partial line and return to accumulating.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = RxState::Accumulating;
    }
}

impl MemPort {
    /// A single unconnected end.
    pub fn new() -> Self {
        Self::default()
    }

    /// Two ends connected to each other, bytes written to one can be read from the other.
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Mutex::new(VecDeque::new()));
        let b = Arc::new(Mutex::new(VecDeque::new()));
        let broken = Arc::new(AtomicBool::new(false));

        (
            Self {
                rx: a.clone(),
                tx: b.clone(),
                broken: broken.clone(),
            },
            Self {
                rx: b,
                tx: a,
                broken,
            },
        )
    }

    /// Make bytes available to be read from this end.
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.rx).extend(bytes.iter().copied());
    }

    /// Take everything written to this end so far.
    pub fn take_written(&self) -> Vec<u8> {
        lock(&self.tx).drain(..).collect()
    }

    /// Simulate the device going away. While broken every read and write fails.
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    fn check(&self) -> io::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "port disconnected"))
        } else {
            Ok(())
        }
    }
}

impl Read for MemPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check()?;

        let mut rx = lock(&self.rx);

        if rx.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(rx.len());
        for (dst, src) in buf.iter_mut().zip(rx.drain(..n)) {
            *dst = src;
        }

        Ok(n)
    }
}

impl Write for MemPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        lock(&self.tx).extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()
    }
}

impl Port for MemPort {
    fn bytes_available(&mut self) -> io::Result<usize> {
        self.check()?;
        Ok(lock(&self.rx).len())
    }
}

impl Port for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Write one line to the port.
///
/// A single attempt is made, any error is returned for the caller to report.
pub fn send_line<P: Port + ?Sized>(port: &mut P, line: &str) -> io::Result<()> {
    port.write_all(line.as_bytes())?;
    port.flush()
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod test {
    use super::*;

    fn collect(framer: &mut LineFramer, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        framer.feed(bytes, |l| lines.push(String::from_utf8_lossy(l).into_owned()));
        lines
    }

    #[test]
    fn test_lines_split_across_feeds() {
        let mut framer = LineFramer::new(64);

        assert!(collect(&mut framer, b"{\"a\":").is_empty());
        assert_eq!(collect(&mut framer, b"1}\r\n{\"b\":2}\n"), vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(framer.stats().lines, 2);
        assert_eq!(framer.stats().max_len_seen, 7);
    }

    #[test]
    fn test_carriage_returns_discarded() {
        let mut framer = LineFramer::new(8);

        assert_eq!(collect(&mut framer, b"\r\ra\rb\r\r\n"), vec!["ab"]);
    }

    #[test]
    fn test_overflow_recovery() {
        let mut framer = LineFramer::new(16);

        // Exactly at capacity is fine
        assert_eq!(collect(&mut framer, b"0123456789abcdef\n"), vec!["0123456789abcdef"]);
        assert_eq!(framer.stats().overflows, 0);

        // One byte over is dropped, as is everything up to the next newline
        let mut bytes = vec![b'x'; 40];
        bytes.push(b'\n');
        bytes.extend_from_slice(b"ok\n");

        assert_eq!(collect(&mut framer, &bytes), vec!["ok"]);
        assert_eq!(framer.stats().overflows, 1);
        assert_eq!(framer.stats().lines, 2);
        assert!(framer.stats().max_len_seen <= framer.capacity());
    }

    #[test]
    fn test_poll_mem_port_pair() {
        let (mut host, mut dev) = MemPort::pair();
        let mut framer = LineFramer::new(64);

        send_line(&mut host, "first\n").unwrap();
        send_line(&mut host, "second\npart").unwrap();

        let mut lines = Vec::new();
        let n = framer
            .poll(&mut dev, |l| lines.push(l.to_vec()))
            .unwrap();

        assert_eq!(n, 17);
        assert_eq!(lines, vec![b"first".to_vec(), b"second".to_vec()]);

        // Nothing waiting, nothing read
        assert_eq!(framer.poll(&mut dev, |_| panic!("no line expected")).unwrap(), 0);

        // Other direction
        send_line(&mut dev, "tlm\n").unwrap();
        assert_eq!(host.bytes_available().unwrap(), 4);
    }

    #[test]
    fn test_poll_is_bounded() {
        let mut port = MemPort::new();
        let mut framer = LineFramer::new(16);

        port.inject(&vec![b'a'; MAX_POLL_BYTES + 100]);

        assert_eq!(framer.poll(&mut port, |_| ()).unwrap(), MAX_POLL_BYTES);
        assert_eq!(port.bytes_available().unwrap(), 100);
    }

    #[test]
    fn test_broken_port() {
        let (mut host, dev) = MemPort::pair();

        dev.set_broken(true);
        assert!(send_line(&mut host, "x\n").is_err());
        assert!(host.bytes_available().is_err());

        dev.set_broken(false);
        assert!(send_line(&mut host, "x\n").is_ok());
        assert_eq!(dev.take_written(), Vec::<u8>::new());
    }
}
