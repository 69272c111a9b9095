pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// STEP line of a stepper driver. One call emits one fixed-width pulse.
pub trait StepPulse {
    fn step_pulse(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// ENA line of a stepper driver. Level semantics (which level enables the
/// driver) are decided by the caller; implementations just set the output.
pub trait EnableLine {
    fn set_level(&mut self, high: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Quadrature encoder pins plus the integrated push button, read by level.
pub trait EncoderPins {
    /// Current (A, B) phase levels.
    fn phases(&mut self) -> (bool, bool);
    /// True while the button is physically held down.
    fn button_pressed(&mut self) -> bool;
}

/// Momentary start/stop button, read by level.
pub trait StartInput {
    fn pressed(&mut self) -> bool;
}

/// Flow-setting potentiometer sampled through an ADC.
pub trait PotInput {
    fn read(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>>;
}
