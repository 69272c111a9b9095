//! Hardware backends for the dosing controller.
//!
//! Simulated implementations of every control-surface trait are always
//! available and are what the binary runs against off the bench. The real
//! Raspberry Pi GPIO/SPI backends live in [`gpio`] behind the `hardware`
//! feature.
//!
//! The simulations are shared-state handles (`Clone` hands out another view
//! of the same device), so one half can move into a sampler or pacer thread
//! while a driver keeps poking the other half.

pub mod error;
#[cfg(feature = "hardware")]
pub mod gpio;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU64, Ordering};

use mql_traits::{EnableLine, EncoderPins, PotInput, StartInput, StepPulse};
use tracing::debug;

/// Quadrature levels by wheel position, one entry per edge. Index 0 is the
/// detent rest; four advances in either direction return to it.
const PHASE_WHEEL: [(bool, bool); 4] = [
    (false, false),
    (true, false),
    (true, true),
    (false, true),
];

/// Simulated stepper STEP line; counts pulses instead of toggling a pin.
#[derive(Debug, Clone, Default)]
pub struct SimulatedStepDrive {
    emitted: Arc<AtomicU64>,
}

impl SimulatedStepDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulses emitted so far, readable from any clone.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl StepPulse for SimulatedStepDrive {
    fn step_pulse(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Simulated stepper ENA line; remembers the driven level.
#[derive(Debug, Clone, Default)]
pub struct SimulatedEnable {
    level: Arc<AtomicBool>,
}

impl SimulatedEnable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }
}

impl EnableLine for SimulatedEnable {
    fn set_level(&mut self, high: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.level.swap(high, Ordering::Relaxed) != high {
            debug!(high, "simulated ENA level");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HeadState {
    /// Wheel position in edges; levels are `PHASE_WHEEL[wheel % 4]`.
    wheel: AtomicU8,
    button: AtomicBool,
}

/// Simulated control head: quadrature wheel plus its push button.
///
/// `advance` moves the wheel one edge; a script drives it from one side
/// while a poller decodes it from the other.
#[derive(Debug, Clone, Default)]
pub struct SimulatedControlHead {
    inner: Arc<HeadState>,
}

impl SimulatedControlHead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the wheel one quadrature edge clockwise or counter-clockwise.
    pub fn advance(&self, cw: bool) {
        // u8 wraps at 256, a multiple of 4, so the phase index stays valid.
        let delta: u8 = if cw { 1 } else { 255 };
        self.inner.wheel.fetch_add(delta, Ordering::Relaxed);
    }

    /// One full detent: four edges in the given direction.
    pub fn turn(&self, cw: bool) {
        for _ in 0..PHASE_WHEEL.len() {
            self.advance(cw);
        }
    }

    pub fn set_button(&self, pressed: bool) {
        self.inner.button.store(pressed, Ordering::Relaxed);
    }
}

impl EncoderPins for SimulatedControlHead {
    fn phases(&mut self) -> (bool, bool) {
        let idx = self.inner.wheel.load(Ordering::Relaxed) % 4;
        PHASE_WHEEL[idx as usize]
    }

    fn button_pressed(&mut self) -> bool {
        self.inner.button.load(Ordering::Relaxed)
    }
}

/// Simulated momentary start/stop button.
#[derive(Debug, Clone, Default)]
pub struct SimulatedStartButton {
    pressed: Arc<AtomicBool>,
}

impl SimulatedStartButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        debug!("simulated start button pressed");
        self.pressed.store(true, Ordering::Relaxed);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::Relaxed);
    }
}

impl StartInput for SimulatedStartButton {
    fn pressed(&mut self) -> bool {
        self.pressed.load(Ordering::Relaxed)
    }
}

/// Simulated flow potentiometer holding a raw 10-bit reading.
#[derive(Debug, Clone)]
pub struct SimulatedPot {
    raw: Arc<AtomicU16>,
}

impl SimulatedPot {
    pub fn new(raw: u16) -> Self {
        Self {
            raw: Arc::new(AtomicU16::new(raw)),
        }
    }

    pub fn set_raw(&self, raw: u16) {
        self.raw.store(raw, Ordering::Relaxed);
    }
}

impl Default for SimulatedPot {
    /// Mid-travel wiper.
    fn default() -> Self {
        Self::new(512)
    }
}

impl PotInput for SimulatedPot {
    fn read(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.raw.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_drive_counts_across_clones() {
        let mut drive = SimulatedStepDrive::new();
        let watcher = drive.clone();
        for _ in 0..3 {
            drive.step_pulse().unwrap();
        }
        assert_eq!(watcher.emitted(), 3);
    }

    #[test]
    fn wheel_returns_to_rest_after_a_detent() {
        let mut head = SimulatedControlHead::new();
        assert_eq!(head.phases(), (false, false));
        head.turn(true);
        assert_eq!(head.phases(), (false, false));
        head.advance(false);
        assert_eq!(head.phases(), (false, true));
    }
}
