//! Run orchestration: config loading, rig assembly and the operator loop.
//!
//! The control core never touches files or devices; this module loads the
//! TOML, claims the backends (sim or GPIO), wires the sampler and pacer
//! threads around the [`ControlLoop`], and executes the persistence
//! requests the core queues up.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use mql_core::{
    CalPhase, Configuration, ControlAction, ControlLoop, DosingController, EncoderEvent,
    EncoderInput, EncoderTuning, InputSampler, MonotonicClock, PolledEncoder, PulsePacer,
    PumpError, Result, RunState, SettingsRequest, StepPulseGenerator, write_back,
};
use mql_hardware::{
    SimulatedControlHead, SimulatedEnable, SimulatedPot, SimulatedStartButton, SimulatedStepDrive,
};
use mql_traits::clock::Clock;
use mql_traits::{EnableLine, PotInput, StartInput, StepPulse};

/// Pot level for the sim rig, raw 0..=adc_max. Lets tests and bench runs
/// pick a setpoint without a physical pot.
pub const SIM_POT_ENV: &str = "MQL_SIM_POT";

pub struct RunArgs {
    pub duration_ms: Option<u64>,
    pub autostart: bool,
    pub stats: bool,
}

/// Counters and final state of one `run` invocation, for the summary line.
#[derive(Debug)]
pub struct RunSummary {
    pub duration_ms: u64,
    pub frames: u64,
    pub target_x100: i32,
    pub rate_hz: u32,
    pub run_state: RunState,
    pub calibrated: bool,
    pub pulses: u64,
    pub pulse_faults: u64,
    pub pot_errors: u64,
    pub coalesced: u64,
    pub stopped_by: &'static str,
}

/// Outcome of a timed calibration dispense.
#[derive(Debug)]
pub struct CalSummary {
    pub secs: u32,
    pub duration_ms: u64,
    pub pulses: u64,
    pub aborted: bool,
}

/// Load and validate the config. A missing file yields the factory
/// defaults so a fresh install can run before anything was ever saved.
/// Runs before tracing is up (the log sink is configured in here), so it
/// stays silent.
pub fn load_config(path: &Path) -> Result<mql_config::Config> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(text) => mql_config::load_toml(&text)
            .map_err(|e| PumpError::Config(format!("parse {}: {e}", path.display())))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => mql_config::Config::default(),
        Err(e) => {
            return Err(eyre::Report::new(e)).wrap_err_with(|| format!("read {}", path.display()));
        }
    };
    cfg.validate()
        .map_err(|e| PumpError::Config(e.to_string()))?;
    Ok(cfg)
}

/// Write the config out, creating the parent directory on first save.
pub fn save_config(path: &Path, cfg: &mql_config::Config) -> Result<()> {
    let text = mql_config::to_toml(cfg)
        .map_err(|e| PumpError::Config(format!("serialize settings: {e}")))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("create {}", parent.display()))?;
        }
    }
    std::fs::write(path, text).wrap_err_with(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Execute one persistence request from the core: fold the panel-editable
/// state into the persisted shape and write the file.
fn persist_settings(
    path: &Path,
    run: &Configuration,
    file_cfg: &mut mql_config::Config,
    req: SettingsRequest,
) -> Result<()> {
    write_back(run, file_cfg);
    save_config(path, file_cfg)?;
    match req {
        SettingsRequest::Persist => {
            tracing::info!(path = %path.display(), "settings persisted");
        }
        SettingsRequest::ResetToDefaults => {
            tracing::info!(path = %path.display(), "factory defaults persisted");
        }
    }
    Ok(())
}

/// Store the factor measured after a reference dispense: volume in ml over
/// the run duration, against the reference rate. Returns the stored
/// ml-per-unit factor (x1000).
pub fn apply_measured_volume(
    path: &Path,
    mut file_cfg: mql_config::Config,
    secs: u32,
    ml: f64,
) -> Result<u32> {
    cal_action_for_secs(secs)?;
    // Same bounds as the panel's four-digit volume entry.
    if !(ml > 0.0) || ml > 99.99 {
        return Err(PumpError::Calibration(format!(
            "measured volume must be in (0, 99.99] ml, got {ml}"
        ))
        .into());
    }
    let ml_x100 = (ml * 100.0).round() as u32;
    let factor = mql_core::factor_x1000_for(ml_x100, secs);
    if factor == 0 {
        return Err(PumpError::Calibration(
            "measured volume too small to calibrate".into(),
        )
        .into());
    }
    file_cfg.calibration.calibrated = true;
    file_cfg.calibration.ml_per_u_x1000 = factor;
    save_config(path, &file_cfg)?;
    tracing::info!(factor_x1000 = factor, secs, "calibration factor stored");
    Ok(factor)
}

/// The two supported reference durations, as menu actions.
pub fn cal_action_for_secs(secs: u32) -> Result<ControlAction> {
    match secs {
        60 => Ok(ControlAction::StartCal60),
        120 => Ok(ControlAction::StartCal120),
        _ => Err(PumpError::Calibration(format!(
            "reference run must be 60 or 120 seconds, got {secs}"
        ))
        .into()),
    }
}

/// Simulation backends. The pot reads a fixed raw level taken from
/// `MQL_SIM_POT` (default mid-travel).
pub fn sim_rig(
    file_cfg: &mql_config::Config,
) -> (
    PolledEncoder<SimulatedControlHead, MonotonicClock>,
    SimulatedStartButton,
    SimulatedPot,
    SimulatedStepDrive,
    SimulatedEnable,
) {
    let tuning = EncoderTuning::from(&file_cfg.encoder);
    let encoder = PolledEncoder::new(SimulatedControlHead::new(), &tuning, MonotonicClock::new());
    let pot_raw = std::env::var(SIM_POT_ENV)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(512)
        .min(file_cfg.pot.adc_max);
    (
        encoder,
        SimulatedStartButton::new(),
        SimulatedPot::new(pot_raw),
        SimulatedStepDrive::new(),
        SimulatedEnable::new(),
    )
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub struct HwRig {
    pub encoder: mql_core::IsrEncoder<mql_hardware::gpio::GpioHeadButton, MonotonicClock>,
    pub start: mql_hardware::gpio::GpioStartButton,
    pub pot: mql_hardware::gpio::Mcp3008Pot,
    pub drive: mql_hardware::gpio::GpioStepDrive,
    pub ena: mql_hardware::gpio::GpioEnableLine,
    /// Keeps the quadrature interrupts registered for the life of the run.
    pub isr: mql_hardware::gpio::QuadratureIsr,
}

/// Claim the GPIO/SPI backends per the `[pins]` section. The quadrature
/// pair goes on edge interrupts; everything else is polled by the sampler.
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn hardware_rig(file_cfg: &mql_config::Config) -> Result<HwRig> {
    use mql_core::{DetentAccumulator, IsrEncoder};
    use mql_hardware::gpio::{
        GpioEnableLine, GpioHeadButton, GpioStartButton, GpioStepDrive, Mcp3008Pot,
        attach_quadrature_isr,
    };

    fn claim<T>(what: &str, res: mql_hardware::error::Result<T>) -> Result<T> {
        res.map_err(|e| PumpError::Hardware(format!("{what}: {e}")).into())
    }

    let p = &file_cfg.pins;
    let drive = claim(
        "claim STEP/DIR",
        GpioStepDrive::new(p.pump_step, p.pump_dir, file_cfg.pump.dir_high),
    )?;
    // Disabled level follows the ENA polarity: active-low drivers idle high.
    let ena = claim(
        "claim ENA",
        GpioEnableLine::new(p.pump_ena, file_cfg.pump.ena_active_low),
    )?;
    let start = claim("claim start button", GpioStartButton::new(p.start_btn))?;
    let pot = claim("open MCP3008", Mcp3008Pot::new(p.pot_channel))?;

    let tuning = EncoderTuning::from(&file_cfg.encoder);
    let acc = DetentAccumulator::new(&tuning);
    let edge_acc = acc.clone();
    let isr = claim(
        "attach quadrature interrupts",
        attach_quadrature_isr(p.enc_a, p.enc_b, move |a, b, t_us| {
            edge_acc.on_edge(a, b, t_us);
        }),
    )?;
    let button = claim("claim head button", GpioHeadButton::new(p.enc_btn))?;
    let encoder = IsrEncoder::new(acc, button, &tuning, MonotonicClock::new());

    Ok(HwRig {
        encoder,
        start,
        pot,
        drive,
        ena,
        isr,
    })
}

/// The operator loop: drain inputs, step the core, execute persistence
/// requests, repeat every input poll period until a signal or the
/// requested duration stops it.
#[allow(clippy::too_many_arguments)]
pub fn run_loop<E, B, P, D, N>(
    config_path: &Path,
    file_cfg: &mut mql_config::Config,
    args: &RunArgs,
    encoder: E,
    start: B,
    pot: P,
    drive: D,
    ena: N,
    shutdown: Arc<AtomicBool>,
) -> Result<RunSummary>
where
    E: EncoderInput + Send + 'static,
    B: StartInput + Send + 'static,
    P: PotInput + Send + 'static,
    D: StepPulse + Send + 'static,
    N: EnableLine,
{
    let clock = MonotonicClock::new();
    let run_cfg = Configuration::from(&*file_cfg);

    let generator = StepPulseGenerator::new(ena, run_cfg.ena_active_low);
    let shared = generator.shared();
    let controller = DosingController::new(generator, clock);
    let mut control = ControlLoop::new(run_cfg, controller, clock);
    control.begin()?;

    let _pacer = PulsePacer::spawn(shared.clone(), drive, clock);
    let poll_ms = file_cfg.timing.input_poll_ms.max(1);
    let sampler = InputSampler::spawn(encoder, start, pot, poll_ms as u32, clock);
    let frame = Duration::from_millis(poll_ms);

    if args.autostart {
        control.on_start_edge();
    }
    tracing::info!(
        autostart = args.autostart,
        duration_ms = args.duration_ms,
        "run start"
    );

    let started = clock.now();
    let mut frames: u64 = 0;
    let mut last_rate_hz: u32 = 0;
    let stopped_by;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            stopped_by = "signal";
            break;
        }
        if let Some(ms) = args.duration_ms {
            if clock.ms_since(started) >= ms {
                stopped_by = "duration";
                break;
            }
        }

        let snap = control.step(sampler.drain())?;
        if snap.rate_hz > 0 {
            last_rate_hz = snap.rate_hz;
        }
        frames += 1;

        for req in control.drain_requests() {
            if let Err(e) = persist_settings(config_path, control.configuration(), file_cfg, req) {
                tracing::warn!(error = %e, "settings persist failed");
            }
        }

        clock.sleep(frame);
    }

    // Stop through the operator surface: abort any calibration session,
    // clear the run request, and let one last tick drive ENA down.
    if control.calibration().is_running() || control.calibration().is_awaiting_volume() {
        control.on_encoder(EncoderEvent {
            hold: true,
            ..Default::default()
        })?;
    }
    if control.run_requested() {
        control.on_start_edge();
    }
    let final_snap = control.tick()?;
    for req in control.drain_requests() {
        if let Err(e) = persist_settings(config_path, control.configuration(), file_cfg, req) {
            tracing::warn!(error = %e, "settings persist failed");
        }
    }

    let summary = RunSummary {
        duration_ms: clock.ms_since(started),
        frames,
        target_x100: final_snap.target_x100,
        rate_hz: last_rate_hz,
        run_state: final_snap.run_state,
        calibrated: final_snap.calibrated,
        pulses: shared.pulses_emitted(),
        pulse_faults: shared.pulse_faults(),
        pot_errors: sampler.pot_errors(),
        coalesced: sampler.coalesced(),
        stopped_by,
    };
    tracing::info!(
        pulses = summary.pulses,
        faults = summary.pulse_faults,
        stopped_by = summary.stopped_by,
        "run stop"
    );
    if args.stats {
        print_stats(&summary);
    }
    Ok(summary)
}

/// Timed reference dispense: run the pump at the calibration rate for the
/// requested duration so the operator can collect and measure the output.
#[allow(clippy::too_many_arguments)]
pub fn run_cal_dispense<E, B, P, D, N>(
    file_cfg: &mql_config::Config,
    secs: u32,
    encoder: E,
    start: B,
    pot: P,
    drive: D,
    ena: N,
    shutdown: Arc<AtomicBool>,
) -> Result<CalSummary>
where
    E: EncoderInput + Send + 'static,
    B: StartInput + Send + 'static,
    P: PotInput + Send + 'static,
    D: StepPulse + Send + 'static,
    N: EnableLine,
{
    let action = cal_action_for_secs(secs)?;
    let clock = MonotonicClock::new();
    let run_cfg = Configuration::from(file_cfg);

    let generator = StepPulseGenerator::new(ena, run_cfg.ena_active_low);
    let shared = generator.shared();
    let controller = DosingController::new(generator, clock);
    let mut control = ControlLoop::new(run_cfg, controller, clock);
    control.begin()?;

    let _pacer = PulsePacer::spawn(shared.clone(), drive, clock);
    let poll_ms = file_cfg.timing.input_poll_ms.max(1);
    let sampler = InputSampler::spawn(encoder, start, pot, poll_ms as u32, clock);
    let frame = Duration::from_millis(poll_ms);

    control.apply(action)?;
    tracing::info!(secs, "calibration dispense start");

    let started = clock.now();
    let mut aborted = false;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            control.on_encoder(EncoderEvent {
                hold: true,
                ..Default::default()
            })?;
            control.tick()?;
            aborted = true;
            break;
        }
        let snap = control.step(sampler.drain())?;
        match snap.cal_phase {
            CalPhase::AwaitingVolume => break,
            // A hold on the physical encoder cancels the session.
            CalPhase::Idle => {
                aborted = true;
                break;
            }
            CalPhase::Running => {}
        }
        clock.sleep(frame);
    }

    let summary = CalSummary {
        secs,
        duration_ms: clock.ms_since(started),
        pulses: shared.pulses_emitted(),
        aborted,
    };
    tracing::info!(
        pulses = summary.pulses,
        aborted = summary.aborted,
        "calibration dispense done"
    );
    Ok(summary)
}

/// Print run counters to stderr regardless of the JSON mode.
fn print_stats(s: &RunSummary) {
    eprintln!("\n--- Pump Stats ---");
    eprintln!("Frames: {}", s.frames);
    eprintln!("Pulses emitted: {} (faults: {})", s.pulses, s.pulse_faults);
    eprintln!(
        "Input: coalesced {}, pot errors {}",
        s.coalesced, s.pot_errors
    );
    eprintln!(
        "Final: state {:?}, target {}.{:02} u/min, last rate {} Hz",
        s.run_state,
        s.target_x100 / 100,
        s.target_x100.rem_euclid(100),
        s.rate_hz
    );
    eprintln!("------------------\n");
}

/// Exercise the planning, decode and pulse paths against the sim
/// backends; with the hardware feature, also claim and release the
/// configured pins.
pub fn self_check(file_cfg: &mql_config::Config) -> Result<()> {
    use mql_core::select_timer;

    // Timer plan spot checks straight from the divider ladder.
    for (hz, expect) in [(1u32, 1u32), (50, 50), (333, 333), (2000, 2000)] {
        let sel = select_timer(hz);
        if sel.actual_hz() != expect {
            return Err(PumpError::State(format!(
                "timer plan for {hz} Hz produced {} Hz",
                sel.actual_hz()
            ))
            .into());
        }
    }
    println!("timer plan: ok");

    // Three CW detents through the polled decoder.
    let tuning = EncoderTuning::from(&file_cfg.encoder);
    let head = SimulatedControlHead::new();
    let knob = head.clone();
    let mut encoder = PolledEncoder::new(head, &tuning, MonotonicClock::new());
    let mut detents: i32 = 0;
    for _ in 0..3 {
        for _ in 0..u32::from(file_cfg.encoder.detent_edges) {
            knob.advance(true);
            std::thread::sleep(Duration::from_millis(1));
            detents += i32::from(encoder.poll().step);
        }
        std::thread::sleep(Duration::from_millis(
            u64::from(file_cfg.encoder.step_guard_ms) + 1,
        ));
        detents += i32::from(encoder.poll().step);
    }
    if detents != 3 {
        return Err(PumpError::State(format!(
            "encoder decode produced {detents} detents, wanted 3"
        ))
        .into());
    }
    println!("encoder decode: ok");

    // Pulse generator and pacer against the sim drive, ~100 ms at 100 Hz.
    let drive = SimulatedStepDrive::new();
    let counter = drive.clone();
    let mut generator = StepPulseGenerator::new(SimulatedEnable::new(), true);
    generator.begin()?;
    generator.set_rate_hz(100);
    let shared = generator.shared();
    let pacer = PulsePacer::spawn(shared, drive, MonotonicClock::new());
    generator.set_enabled(true)?;
    std::thread::sleep(Duration::from_millis(100));
    generator.set_enabled(false)?;
    drop(pacer);
    let emitted = counter.emitted();
    if emitted == 0 {
        return Err(PumpError::State("pulse pacer emitted nothing".into()).into());
    }
    println!("pulse path: ok ({emitted} pulses at 100 Hz)");

    // Pot read through the trait boundary.
    let mut pot = SimulatedPot::default();
    let raw = pot
        .read()
        .map_err(|e| PumpError::Hardware(format!("sim pot: {e}")))?;
    println!("pot read: ok (raw {raw})");

    #[cfg(all(feature = "hardware", target_os = "linux"))]
    {
        // Claim and release the real pins so wiring faults show up here
        // instead of mid-run.
        let rig = hardware_rig(file_cfg)?;
        drop(rig);
        println!("hardware claim: ok");
    }

    Ok(())
}
