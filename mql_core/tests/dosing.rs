//! Dosing state machine tests on a virtual clock.
//!
//! Asserts:
//! - pulsed-mode phase boundaries land exactly on the configured on/off
//!   durations, and the enable gate follows the phase
//! - zero demand stops the pump from every running state
//! - a mode edit mid-run restarts the regime on the next tick
//! - the step rate tracks the setpoint while running

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mql_core::config::{Configuration, DoseMode};
use mql_core::dosing::{DosingController, RunState};
use mql_core::mocks::NullEnable;
use mql_core::pulse::StepPulseGenerator;
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

fn controller(clk: &TestClock) -> DosingController<NullEnable, TestClock> {
    let pulse_gen = StepPulseGenerator::new(NullEnable::default(), true);
    let mut c = DosingController::new(pulse_gen, clk.clone());
    c.begin().unwrap();
    c
}

#[test]
fn pulsed_phase_boundaries_are_exact() {
    let clk = TestClock::new();
    let mut c = controller(&clk);
    let cfg = Configuration {
        mode: DoseMode::Pulsed,
        ..Configuration::default()
    };

    c.start(&cfg, 100).unwrap();
    assert_eq!(c.state(), RunState::RunPulseOn);
    assert!(c.generator().is_enabled());

    clk.advance(499);
    assert_eq!(c.tick(&cfg, 100).unwrap(), RunState::RunPulseOn);
    clk.advance(1); // on-phase elapsed exactly 500 ms
    assert_eq!(c.tick(&cfg, 100).unwrap(), RunState::RunPulseOff);
    assert!(!c.generator().is_enabled());

    clk.advance(1999);
    assert_eq!(c.tick(&cfg, 100).unwrap(), RunState::RunPulseOff);
    clk.advance(1); // off-phase elapsed exactly 2000 ms
    assert_eq!(c.tick(&cfg, 100).unwrap(), RunState::RunPulseOn);
    assert!(c.generator().is_enabled());
}

#[test]
fn short_phase_settings_hit_the_floor() {
    let clk = TestClock::new();
    let mut c = controller(&clk);
    let cfg = Configuration {
        mode: DoseMode::Pulsed,
        pulse_on_ms: 1, // below the 10 ms floor
        ..Configuration::default()
    };

    c.start(&cfg, 100).unwrap();
    clk.advance(9);
    assert_eq!(c.tick(&cfg, 100).unwrap(), RunState::RunPulseOn);
    clk.advance(1);
    assert_eq!(c.tick(&cfg, 100).unwrap(), RunState::RunPulseOff);
}

#[test]
fn zero_demand_stops_from_every_state() {
    let clk = TestClock::new();
    let cfg = Configuration::default();

    // Continuous.
    let mut c = controller(&clk);
    c.start(&cfg, 100).unwrap();
    assert_eq!(c.state(), RunState::RunContinuous);
    assert_eq!(c.tick(&cfg, 0).unwrap(), RunState::Stopped);
    assert!(!c.generator().is_enabled());

    // Pulsed, ON phase.
    let cfg_p = Configuration {
        mode: DoseMode::Pulsed,
        ..Configuration::default()
    };
    let mut c = controller(&clk);
    c.start(&cfg_p, 100).unwrap();
    assert_eq!(c.tick(&cfg_p, 0).unwrap(), RunState::Stopped);

    // Pulsed, OFF phase.
    let mut c = controller(&clk);
    c.start(&cfg_p, 100).unwrap();
    clk.advance(500);
    assert_eq!(c.tick(&cfg_p, 100).unwrap(), RunState::RunPulseOff);
    assert_eq!(c.tick(&cfg_p, 0).unwrap(), RunState::Stopped);
}

#[test]
fn demand_that_truncates_to_zero_steps_stops() {
    let clk = TestClock::new();
    let cfg = Configuration {
        pump_gain_steps_per_u_min: 1,
        ..Configuration::default()
    };

    let mut c = controller(&clk);
    // 0.35 u/min at gain 1 is zero whole steps per minute.
    c.start(&cfg, 35).unwrap();
    assert_eq!(c.state(), RunState::Stopped);
    assert!(!c.generator().is_enabled());
}

#[test]
fn mode_edit_mid_run_restarts_the_regime() {
    let clk = TestClock::new();
    let mut c = controller(&clk);
    let mut cfg = Configuration::default();

    c.start(&cfg, 100).unwrap();
    assert_eq!(c.state(), RunState::RunContinuous);

    cfg.mode = DoseMode::Pulsed;
    assert_eq!(c.tick(&cfg, 100).unwrap(), RunState::RunPulseOn);

    cfg.mode = DoseMode::Continuous;
    assert_eq!(c.tick(&cfg, 100).unwrap(), RunState::RunContinuous);
}

#[test]
fn rate_tracks_the_setpoint() {
    let clk = TestClock::new();
    let mut c = controller(&clk);
    let cfg = Configuration::default();

    // 1.00 u/min * 1000 steps/u = 1000 steps/min -> ceil(16.7) = 17 Hz
    c.start(&cfg, 100).unwrap();
    assert_eq!(c.rate_hz(), 17);

    // 2.00 u/min -> 2000 steps/min -> ceil(33.3) = 34 Hz
    c.tick(&cfg, 200).unwrap();
    assert_eq!(c.rate_hz(), 34);
}

#[test]
fn stop_is_idempotent_and_reports_stopped() {
    let clk = TestClock::new();
    let mut c = controller(&clk);
    let cfg = Configuration::default();

    c.start(&cfg, 100).unwrap();
    c.stop().unwrap();
    assert_eq!(c.state(), RunState::Stopped);
    c.stop().unwrap();
    assert_eq!(c.state(), RunState::Stopped);
    // Ticking while stopped stays stopped, whatever the demand.
    assert_eq!(c.tick(&cfg, 100).unwrap(), RunState::Stopped);
}
