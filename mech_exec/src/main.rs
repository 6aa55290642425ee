//! # Mechanisms Control Executable
//!
//! Device side of the robot link. Runs a single control loop which:
//! - Receives commands from the host over the serial line
//! - Makes every actuator safe if the commands stop arriving
//! - Sequences the servos, mechanism motors and drive
//! - Samples the ultrasonic ranger
//! - Sends telemetry back to the host

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::{
    link::{tokio_serial, Port},
    tlm::RangeState,
};
use log::{debug, info, warn};
use std::time::Duration;

// Internal
use mech_lib::{
    cmd_link::CmdLink,
    mech_ctrl::{MechCtrl, MechFeedback},
    params::MechExecParams,
    ranging::{RangeSensor, Ranger, SimRanger},
    safety::{SafetyEvent, SafetySupervisor},
    servo_ctrl::{sim::SimPwm, PwmDriver},
    sim::SimPlant,
};
use util::{
    logger::{logger_init, LevelFilter},
    rate::RateGate,
    session::Session,
    time::MonotonicClock,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Period between link statistics reports in the log.
///
/// Units: milliseconds
const STATS_PERIOD_MS: u64 = 10_000;

/// Distance read by the simulated ranger.
///
/// Units: centimetres
const SIM_RANGE_CM: f64 = 100.0;

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mech_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Mechanisms Control Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: MechExecParams =
        util::params::load("mech_exec.toml").wrap_err("Failed to load the parameters")?;
    params.are_valid().wrap_err("Invalid parameters")?;

    info!("Parameters loaded");

    // ---- OPEN THE LINK ----

    let mut port = tokio_serial::new(&params.serial_device, params.serial_baud)
        .timeout(Duration::from_millis(1))
        .open()
        .wrap_err_with(|| format!("Failed to open serial device {}", params.serial_device))?;

    info!(
        "Opened {} at {} baud",
        params.serial_device, params.serial_baud
    );

    // ---- HARDWARE ----

    if params.sim_hardware {
        info!("Using simulated hardware");

        run(
            &params,
            &mut port,
            SimPwm::new(),
            SimRanger::fixed(SIM_RANGE_CM),
            Some(SimPlant::new()),
        )
    } else {
        run_hardware(&params, &mut port)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

#[cfg(all(target_arch = "arm", target_os = "linux"))]
fn run_hardware<L: Port + ?Sized>(params: &MechExecParams, port: &mut L) -> Result<()> {
    use mech_lib::{ranging::hcsr04::HcSr04, servo_ctrl::pca9685};

    let pwm = pca9685::open_rpi(params.i2c_bus, params.pca9685_address)
        .wrap_err("Failed to open the PWM driver")?;
    let sensor = HcSr04::new(&params.ranging).wrap_err("Failed to open the ultrasonic sensor")?;

    info!("Hardware initialised");

    run(params, port, pwm, sensor, None)
}

#[cfg(not(all(target_arch = "arm", target_os = "linux")))]
fn run_hardware<L: Port + ?Sized>(_params: &MechExecParams, _port: &mut L) -> Result<()> {
    Err(color_eyre::eyre::eyre!(
        "Real hardware is only available on the Raspberry Pi, set sim_hardware = true"
    ))
}

/// Run the control loop forever.
fn run<L, P, S>(
    params: &MechExecParams,
    port: &mut L,
    pwm: P,
    sensor: S,
    mut plant: Option<SimPlant>,
) -> Result<()>
where
    L: Port + ?Sized,
    P: PwmDriver,
    S: RangeSensor,
{
    let clock = MonotonicClock::new();
    let now_ms = clock.now_ms();

    let mut link = CmdLink::new(params.rx_buf_size, now_ms);
    let mut ctrl = MechCtrl::new(params, pwm, now_ms);
    let mut ranger = Ranger::new(sensor, &params.ranging);
    let mut supervisor = SafetySupervisor::new();

    let mut rx_gate = RateGate::from_hz(params.rx_rate_hz);
    let mut servo_gate = RateGate::from_hz(params.servo_rate_hz);
    let mut drive_gate = RateGate::from_hz(params.drive_rate_hz);
    let mut ranging_gate = RateGate::from_hz(params.ranging_rate_hz);
    let mut tlm_gate = RateGate::from_hz(params.tlm_rate_hz);
    let mut stats_gate = RateGate::from_period_ms(STATS_PERIOD_MS);

    let mut range = RangeState::invalid();

    info!("Initialisation complete, entering main loop");

    loop {
        let now_ms = clock.now_ms();

        // ---- RECEIVE ----

        if rx_gate.ready(now_ms) {
            if let Err(e) = link.rx_tick(port, now_ms) {
                warn!("Could not read from the command link: {}", e);
            }
        }

        // ---- SAFETY ----

        let stale = link.store().is_stale(now_ms, params.cmd_timeout_ms);

        if supervisor.update(stale, now_ms, &mut ctrl) == SafetyEvent::EnteredTimeout {
            link.set_note(format!("TIMEOUT count={}", supervisor.num_timeouts()), now_ms);
        }

        if !stale {
            if let Some(cmd) = link.store().latest() {
                ctrl.apply(cmd, now_ms);
            }
        }

        // ---- ACTUATORS ----

        if servo_gate.ready(now_ms) {
            ctrl.tick_servos(now_ms);
        }

        if drive_gate.ready(now_ms) {
            let feedback = plant
                .as_ref()
                .map(SimPlant::feedback)
                .unwrap_or_else(MechFeedback::default);

            let duties = ctrl.tick_motors(now_ms, feedback);

            if let Some(p) = plant.as_mut() {
                p.step(now_ms, &duties);
            }
        }

        // ---- SENSORS ----

        if ranging_gate.ready(now_ms) {
            range = ranger.update(now_ms);
        }

        // ---- TELEMETRY ----

        if tlm_gate.ready(now_ms) {
            let tlm = ctrl.telemetry(now_ms, range, link.note(now_ms));

            if let Err(e) = link.send_tlm(port, &tlm) {
                warn!("Could not send telemetry: {}", e);
            }
        }

        if stats_gate.ready(now_ms) {
            let rx = link.stats();
            let framer = link.framer_stats();
            debug!(
                "Link: {} ok, {} failed, {} overflows, longest line {} bytes, {} timeouts",
                rx.ok,
                rx.fail,
                framer.overflows,
                framer.max_len_seen,
                supervisor.num_timeouts()
            );
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
