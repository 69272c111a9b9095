//! Operator-session tests through the full control loop.
//!
//! Each scenario feeds merged input samples into [`ControlLoop::step`] on a
//! virtual clock and checks the display snapshot an embedding UI would
//! render: pot mapping, start/stop, a complete calibration session, and
//! live band edits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mql_core::actions::{ControlAction, SettingsRequest};
use mql_core::calibration::CalPhase;
use mql_core::config::{Configuration, ParamField};
use mql_core::dosing::{DosingController, RunState};
use mql_core::encoder::EncoderEvent;
use mql_core::input::InputSample;
use mql_core::mocks::NullEnable;
use mql_core::pulse::StepPulseGenerator;
use mql_core::runner::ControlLoop;
use mql_traits::clock::Clock;

// Deterministic test clock to advance virtual time
#[derive(Clone)]
struct TestClock {
    origin: Instant,
    ms: Arc<AtomicU64>,
}
impl TestClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            ms: Arc::new(AtomicU64::new(0)),
        }
    }
    fn advance(&self, ms: u64) {
        self.ms.fetch_add(ms, Ordering::Relaxed);
    }
}
impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.ms.load(Ordering::Relaxed))
    }
    fn sleep(&self, d: Duration) {
        let add = d.as_millis() as u64;
        if add > 0 {
            self.advance(add);
        }
    }
}

fn rig() -> (ControlLoop<NullEnable, TestClock>, TestClock) {
    let clock = TestClock::new();
    let pulse_gen = StepPulseGenerator::new(NullEnable::default(), true);
    let controller = DosingController::new(pulse_gen, clock.clone());
    let mut lp = ControlLoop::new(Configuration::default(), controller, clock.clone());
    lp.begin().unwrap();
    (lp, clock)
}

fn pot(raw: u16) -> InputSample {
    InputSample {
        pot_raw: Some(raw),
        ..Default::default()
    }
}

fn start_press() -> InputSample {
    InputSample {
        start: true,
        ..Default::default()
    }
}

fn turn(step: i8) -> InputSample {
    InputSample {
        event: EncoderEvent {
            step,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn click() -> InputSample {
    InputSample {
        event: EncoderEvent {
            click: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn pot_start_and_stop_drive_a_continuous_dose() {
    let (mut lp, clk) = rig();

    // Default recommendation: steel, 10 mm cutter -> 0.55 u/min.
    let snap = lp.step(pot(512)).unwrap();
    assert_eq!(snap.recommended_x100, 55);
    // Band [0.27, 1.10], pot at 512/1023 -> 0.68.
    assert_eq!(snap.target_x100, 68);
    assert_eq!(snap.run_state, RunState::Stopped);
    assert_eq!(snap.rate_hz, 0);

    let snap = lp.step(start_press()).unwrap();
    assert_eq!(snap.run_state, RunState::RunContinuous);
    // 0.68 u/min * 1000 steps/u = 680 steps/min -> ceil(11.3) = 12 Hz.
    assert_eq!(snap.rate_hz, 12);

    // Pot drifts to zero; the averaged target walks down and settles
    // within one hysteresis step of the kmin floor, pump still running.
    let mut snap = lp.step(pot(0)).unwrap();
    for _ in 0..64 {
        clk.advance(20);
        snap = lp.step(pot(0)).unwrap();
    }
    assert_eq!(snap.target_x100, 28);
    assert_eq!(snap.run_state, RunState::RunContinuous);
    assert_eq!(snap.rate_hz, 5);

    let snap = lp.step(start_press()).unwrap();
    assert_eq!(snap.run_state, RunState::Stopped);
    assert_eq!(snap.rate_hz, 0);
}

#[test]
fn calibration_session_measures_then_dosing_resumes() {
    let (mut lp, clk) = rig();
    lp.step(pot(1023)).unwrap();

    lp.apply(ControlAction::StartCal60).unwrap();
    let snap = lp.step(InputSample::default()).unwrap();
    assert_eq!(snap.cal_phase, CalPhase::Running);
    assert_eq!(snap.run_state, RunState::RunContinuous);
    assert_eq!(snap.cal_remaining_secs, 60);

    clk.advance(30_000);
    let snap = lp.step(InputSample::default()).unwrap();
    assert_eq!(snap.cal_remaining_secs, 30);

    clk.advance(30_000);
    let snap = lp.step(InputSample::default()).unwrap();
    assert_eq!(snap.cal_phase, CalPhase::AwaitingVolume);
    assert_eq!(snap.run_state, RunState::Stopped);

    // Operator keys in 12.00 ml: tens 1, ones 2, zeros confirmed through.
    lp.step(turn(1)).unwrap();
    lp.step(click()).unwrap();
    lp.step(turn(2)).unwrap();
    lp.step(click()).unwrap();
    lp.step(click()).unwrap();
    let snap = lp.step(click()).unwrap();
    assert_eq!(snap.cal_phase, CalPhase::Idle);
    assert!(snap.calibrated);
    // 12.00 ml over 60 s at 100.00 u/min reference -> 0.120 ml/u.
    assert_eq!(snap.ml_per_u_x1000, 120);
    assert_eq!(lp.drain_requests(), vec![SettingsRequest::Persist]);

    // Start works again now the session is over.
    let snap = lp.step(start_press()).unwrap();
    assert_eq!(snap.run_state, RunState::RunContinuous);
    assert_eq!(snap.rate_hz, 19); // 1.10 u/min * 1000 -> ceil(18.3)
}

#[test]
fn band_edits_reshape_the_target_live() {
    let (mut lp, clk) = rig();

    let snap = lp.step(pot(512)).unwrap();
    assert_eq!(snap.target_x100, 68);

    // kmin 0.50 -> 0.60 moves the low end of the band up.
    let out = lp.adjust(ParamField::KminX100, 5);
    assert!(out.changed);
    clk.advance(20);
    let snap = lp.step(pot(512)).unwrap();
    assert_eq!(snap.target_x100, 71);
}

#[test]
fn settings_requests_queue_in_order() {
    let (mut lp, _clk) = rig();

    lp.apply(ControlAction::Save).unwrap();
    lp.apply(ControlAction::ClearCal).unwrap();
    assert_eq!(
        lp.drain_requests(),
        vec![SettingsRequest::Persist, SettingsRequest::Persist]
    );
    assert!(!lp.configuration().calibrated);
    assert_eq!(lp.configuration().ml_per_u_x1000, 0);
    assert!(lp.drain_requests().is_empty());
}
