//! Error mapping at the hardware trait boundaries.

use mql_core::error::PumpError;
use mql_core::mocks::{FailingPulse, NullEnable};
use mql_core::pulse::StepPulseGenerator;
use mql_traits::EnableLine;

/// An enable line whose every write fails with a fixed message.
struct DeadEna(&'static str);

impl EnableLine for DeadEna {
    fn set_level(&mut self, _high: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err(self.0.into())
    }
}

#[test]
fn boundary_errors_map_to_typed_hardware() {
    let mut g = StepPulseGenerator::new(DeadEna("gpio write failed"), true);
    let err = g.begin().expect_err("expected hardware error");
    match err.downcast_ref::<PumpError>() {
        Some(PumpError::Hardware(msg)) => assert!(msg.contains("gpio write failed")),
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn fault_messages_map_to_hardware_fault() {
    let mut g = StepPulseGenerator::new(DeadEna("driver reports FAULT line low"), true);
    let err = g.set_enabled(true).expect_err("expected fault error");
    match err.downcast_ref::<PumpError>() {
        Some(PumpError::HardwareFault(_)) => {}
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn step_pulse_failures_surface_through_the_shared_gate() {
    let mut g = StepPulseGenerator::new(NullEnable::default(), true);
    g.set_enabled(true).unwrap();
    let shared = g.shared();
    let err = shared
        .emit_if_enabled(&mut FailingPulse)
        .expect_err("expected drive error");
    match err.downcast_ref::<PumpError>() {
        Some(PumpError::HardwareFault(_)) => {}
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn display_strings_carry_the_message() {
    let e = PumpError::Calibration("measured volume too small".into());
    assert_eq!(e.to_string(), "calibration error: measured volume too small");
    let e = PumpError::Config("adc_max must be nonzero".into());
    assert_eq!(e.to_string(), "configuration error: adc_max must be nonzero");
}
