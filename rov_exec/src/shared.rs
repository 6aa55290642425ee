//! # Shared link
//!
//! Runs a [`HostLink`] on a background thread. The thread takes the current demand from a
//! [`SharedLink`] on every transmit tick and publishes the latest telemetry and link statistics
//! back into it, so the main thread never touches the port.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use comms_if::{cmd::Demand, tlm::TlmFrame};
use log::{error, info};
use util::{rate::RateGate, time::MonotonicClock};

use crate::host_link::{HostLink, LinkStats, PortOpener};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Demand and link state shared between the main thread and the link thread.
#[derive(Clone, Default)]
pub struct SharedLink {
    inner: Arc<Mutex<Shared>>,
}

#[derive(Default)]
struct Shared {
    demand: Option<Demand>,
    tlm: Option<TlmFrame>,
    stats: Option<LinkStats>,
}

/// Handle to the background link thread. The thread is stopped when this is dropped.
pub struct LinkThread {
    jh: Option<JoinHandle<()>>,
    run: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SharedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the demand sent on every following transmit tick.
    pub fn set_demand(&self, demand: Demand) {
        self.lock().demand = Some(demand);
    }

    /// Stop sending commands.
    pub fn clear_demand(&self) {
        self.lock().demand = None;
    }

    pub fn demand(&self) -> Option<Demand> {
        self.lock().demand.clone()
    }

    /// Latest telemetry received by the link thread.
    pub fn telemetry(&self) -> Option<TlmFrame> {
        self.lock().tlm.clone()
    }

    /// Link statistics as of the last link thread cycle, `None` before the first one.
    pub fn stats(&self) -> Option<LinkStats> {
        self.lock().stats.clone()
    }

    fn publish(&self, tlm: Option<&TlmFrame>, stats: &LinkStats) {
        let mut shared = self.lock();

        shared.tlm = tlm.cloned();
        shared.stats = Some(stats.clone());
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LinkThread {
    /// Start the link thread, cycling the link at `rate_hz`.
    pub fn spawn<O>(mut link: HostLink<O>, shared: SharedLink, rate_hz: f64) -> Self
    where
        O: PortOpener + Send + 'static,
        O::Port: Send,
    {
        let run = Arc::new(AtomicBool::new(true));
        let run_clone = run.clone();

        let jh = thread::spawn(move || {
            let clock = MonotonicClock::new();
            let mut gate = RateGate::from_hz(rate_hz);

            info!("Link thread started at {} Hz", rate_hz);

            while run_clone.load(Ordering::Relaxed) {
                let now_ms = clock.now_ms();

                if gate.ready(now_ms) {
                    link.rx_tick(now_ms);

                    let demand = shared.demand();
                    link.tx_tick(now_ms, demand.as_ref());

                    shared.publish(link.latest_telemetry(), link.stats());
                }

                thread::sleep(Duration::from_millis(1));
            }

            link.close();
            shared.publish(link.latest_telemetry(), link.stats());

            info!("Link thread stopped");
        });

        Self { jh: Some(jh), run }
    }

    /// Stop the thread and wait for it to finish.
    pub fn stop(&mut self) {
        self.run.store(false, Ordering::Relaxed);

        if let Some(jh) = self.jh.take() {
            if jh.join().is_err() {
                error!("Link thread panicked");
            }
        }
    }
}

impl Drop for LinkThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host_link::{
        test::{cfg, tlm_line, MemOpener},
        LinkState,
    };
    use comms_if::cmd::{CmdFrame, DriveCmd};
    use std::time::Instant;

    /// Poll `cond` for up to two seconds.
    fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_demand_round_trip() {
        let shared = SharedLink::new();
        assert!(shared.demand().is_none());

        shared.set_demand(Demand::stop());
        assert_eq!(shared.demand(), Some(Demand::stop()));

        shared.clear_demand();
        assert!(shared.demand().is_none());
        assert!(shared.stats().is_none());
    }

    #[test]
    fn test_link_thread() {
        let opener = MemOpener::default();
        let port = opener.port.clone();
        let shared = SharedLink::new();

        let demand = Demand {
            drive: DriveCmd {
                linear_ftps: 1.0,
                angular_dps: 0.0,
            },
            ..Default::default()
        };
        shared.set_demand(demand.clone());

        let mut link_thread =
            LinkThread::spawn(HostLink::new(cfg(), opener), shared.clone(), 200.0);

        assert!(wait_for(|| shared
            .stats()
            .map(|s| s.state == LinkState::Connecting)
            .unwrap_or(false)));

        // First line is discarded, the second one connects the link
        port.inject(b"\n");
        port.inject(tlm_line(3).as_bytes());

        assert!(wait_for(|| shared.telemetry().map(|t| t.ack_seq) == Some(3)));
        assert!(wait_for(|| shared
            .stats()
            .map(|s| s.tx_seq >= 2)
            .unwrap_or(false)));

        let written = String::from_utf8_lossy(&port.take_written()).into_owned();
        assert!(written.lines().count() >= 2);
        for line in written.lines() {
            assert_eq!(CmdFrame::from_json(line).unwrap().demand(), demand);
        }

        link_thread.stop();
        assert_eq!(
            shared.stats().map(|s| s.state),
            Some(LinkState::Disconnected)
        );
    }
}
