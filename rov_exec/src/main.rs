//! Main rover-side executable entry point.
//!
//! # Architecture
//!
//! The host end of the serial link runs on its own thread (see `rov_lib::shared`). The main
//! loop is a command source for it:
//!
//!     - With a command script (`rov_exec <script_path>`): once the device has been heard from,
//!       the script's demands are played out in time and a stop demand is sent at the end.
//!     - Without a script: a stop demand is sent continuously, which keeps the device's
//!       command link fresh while leaving every mechanism where it is.
//!
//! The link state and latest telemetry are reported in the log periodically.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::cmd::Demand;
use log::{debug, info, warn};
use std::{
    env, thread,
    time::{Duration, Instant},
};

// Internal
use rov_lib::{
    host_link::{HostLink, LinkState, SerialOpener},
    params::RovExecParams,
    shared::{LinkThread, SharedLink},
};
use util::{
    logger::{logger_init, LevelFilter},
    rate::RateGate,
    script_interpreter::{merge_due, PendingDemands, ScriptInterpreter},
    session::Session,
    time::MonotonicClock,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Time to keep sending the final stop demand before exiting at the end of a script.
///
/// Units: milliseconds
const END_OF_SCRIPT_HOLD_MS: u64 = 1000;

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("rov_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Rover Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: RovExecParams =
        util::params::load("rov_exec.toml").wrap_err("Failed to load the parameters")?;
    params.are_valid().wrap_err("Invalid parameters")?;

    info!("Parameters loaded");

    // ---- COMMAND SOURCE ----

    let args: Vec<String> = env::args().collect();

    let mut script = match args.get(1) {
        Some(path) => {
            let script = ScriptInterpreter::new(path).wrap_err("Failed to load the script")?;
            info!(
                "Loaded script {} with {} demands over {:.1} s",
                path,
                script.get_num_demands(),
                script.get_duration()
            );
            Some(script)
        }
        None => {
            info!("No script given, sending stop demands");
            None
        }
    };

    // ---- LINK ----

    let shared = SharedLink::new();
    shared.set_demand(Demand::stop());

    let mut link_thread = LinkThread::spawn(
        HostLink::new(params.link.clone(), SerialOpener),
        shared.clone(),
        params.link_rate_hz,
    );

    // ---- MAIN LOOP ----

    let clock = MonotonicClock::new();
    let cycle_period = Duration::from_secs_f64(1.0 / params.demand_rate_hz);
    let mut status_gate = RateGate::from_period_ms(params.status_period_ms);

    let mut script_start_ms: Option<u64> = None;
    let mut script_end_ms: Option<u64> = None;

    info!("Initialisation complete, entering main loop");

    loop {
        let cycle_start = Instant::now();
        let now_ms = clock.now_ms();

        let stats = shared.stats();
        let connected = stats
            .as_ref()
            .map(|s| s.state == LinkState::Connected)
            .unwrap_or(false);

        // ---- DEMANDS ----

        if let Some(script) = script.as_mut() {
            // Script time only starts once the device is talking
            if script_start_ms.is_none() && connected {
                info!("Device connected, starting script");
                script_start_ms = Some(now_ms);
            }

            if let Some(start_ms) = script_start_ms {
                let elapsed_s = now_ms.saturating_sub(start_ms) as f64 / 1000.0;

                match script.get_pending(elapsed_s) {
                    PendingDemands::None => (),
                    PendingDemands::Some(dems) => {
                        debug!("{} demand(s) due at {:.2} s", dems.len(), elapsed_s);
                        if let Some(d) = merge_due(dems) {
                            shared.set_demand(d);
                        }
                    }
                    PendingDemands::EndOfScript => {
                        if script_end_ms.is_none() {
                            info!("End of script, stopping");
                            shared.set_demand(Demand::stop());
                            script_end_ms = Some(now_ms);
                        }
                    }
                }
            }

            if let Some(end_ms) = script_end_ms {
                if now_ms.saturating_sub(end_ms) >= END_OF_SCRIPT_HOLD_MS {
                    break;
                }
            }
        }

        // ---- STATUS ----

        if status_gate.ready(now_ms) {
            match (&stats, shared.telemetry()) {
                (Some(s), Some(tlm)) => info!(
                    "Link {:?}: ack {} / sent {}, rx {:.1} Hz, tx {:.1} Hz, range {}",
                    s.state,
                    tlm.ack_seq,
                    s.tx_seq,
                    s.rx_hz.unwrap_or(0.0),
                    s.tx_hz.unwrap_or(0.0),
                    match tlm.ultrasonic.distance_in {
                        Some(d) => format!("{:.1} in", d),
                        None => String::from("invalid"),
                    }
                ),
                (Some(s), None) => info!(
                    "Link {:?} on {}, no telemetry yet{}",
                    s.state,
                    s.port.as_deref().unwrap_or("(no port)"),
                    match &s.last_error {
                        Some(e) => format!(" ({})", e),
                        None => String::new(),
                    }
                ),
                (None, _) => (),
            }
        }

        // ---- CYCLE MANAGEMENT ----

        match cycle_period.checked_sub(cycle_start.elapsed()) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.3} s",
                (cycle_start.elapsed() - cycle_period).as_secs_f64()
            ),
        }
    }

    link_thread.stop();

    info!("End of execution");

    Ok(())
}
