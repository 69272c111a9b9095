#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core pump-control logic (hardware-agnostic).
//!
//! This crate provides the hardware-independent control engine of the MQL
//! dosing pump. All hardware interactions go through the `mql_traits`
//! capability traits (`StepPulse`, `EnableLine`, `EncoderPins`,
//! `StartInput`, `PotInput`).
//!
//! ## Architecture
//!
//! - **Encoder**: Gray-code quadrature decode and button debounce (`encoder`)
//! - **Pulse**: timer divider selection and the step pacer (`pulse`)
//! - **Flow**: recommendation table and pot-to-setpoint mapping (`flow`)
//! - **Dosing**: continuous/pulsed state machine (`dosing`)
//! - **Calibration**: timed reference runs and the volume editor (`calibration`)
//! - **Runner**: the operator control loop tying it together (`runner`)
//!
//! ## Fixed-Point Arithmetic
//!
//! Flow rates are **x100 scaled** `i32` (1 = 0.01 u/min) and the
//! calibration factor is **x1000 scaled** (1 = 0.001 ml/u), both computed
//! with widened intermediates. Rounding direction is load-bearing: Hz
//! conversion rounds up, ratio scaling truncates. See `fixed_point`.

// Module declarations
pub mod actions;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod dosing;
pub mod encoder;
pub mod error;
pub mod fixed_point;
pub mod flow;
pub mod hw_error;
pub mod input;
pub mod mocks;
pub mod pulse;
pub mod runner;
pub mod status;

pub use crate::actions::{ControlAction, SettingsRequest};
pub use crate::calibration::{
    CAL_REF_RATE_X100, CalDuration, CalPhase, CalibrationEngine, VolumeEntry, factor_x1000_for,
};
pub use crate::config::{
    AdjustOutcome, Configuration, DoseMode, EncoderTuning, Material, ParamField,
};
pub use crate::conversions::write_back;
pub use crate::dosing::{DosingController, RunState};
pub use crate::encoder::{
    ButtonDecoder, DetentAccumulator, EncoderEvent, EncoderInput, IsrEncoder, PolledEncoder,
};
pub use crate::error::{PumpError, Report, Result};
pub use crate::flow::{PotFilter, SetpointHysteresis};
pub use crate::input::{InputSample, InputSampler};
pub use crate::pulse::{
    MAX_STEP_HZ, MIN_STEP_HZ, PulsePacer, PulseShared, StepPulseGenerator, TimerSelection,
    select_timer,
};
pub use crate::runner::ControlLoop;
pub use crate::status::DisplaySnapshot;
pub use mql_traits::clock::{Clock, MonotonicClock};
