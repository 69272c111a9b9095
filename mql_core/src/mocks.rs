//! Test and helper mocks for mql_core

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::encoder::{EncoderEvent, EncoderInput};

/// An enable line that goes nowhere; remembers the last level for
/// assertions and dry runs.
#[derive(Debug, Default)]
pub struct NullEnable {
    pub level: bool,
}

impl mql_traits::EnableLine for NullEnable {
    fn set_level(&mut self, high: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.level = high;
        Ok(())
    }
}

/// A step drive that counts pulses instead of toggling a pin.
#[derive(Debug, Default)]
pub struct CountingPulse {
    hits: Arc<AtomicU64>,
}

impl CountingPulse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared hit counter, usable after the drive moves into a pacer.
    pub fn hits(&self) -> Arc<AtomicU64> {
        self.hits.clone()
    }
}

impl mql_traits::StepPulse for CountingPulse {
    fn step_pulse(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A step drive that always fails; exercises the fault path.
pub struct FailingPulse;

impl mql_traits::StepPulse for FailingPulse {
    fn step_pulse(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("pulse drive fault")))
    }
}

/// A pot stuck at one raw value.
#[derive(Debug, Clone, Copy)]
pub struct FixedPot(pub u16);

impl mql_traits::PotInput for FixedPot {
    fn read(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0)
    }
}

/// A start button that never fires.
pub struct IdleStart;

impl mql_traits::StartInput for IdleStart {
    fn pressed(&mut self) -> bool {
        false
    }
}

/// Replays a prepared sequence of decoded events, then goes quiet.
#[derive(Debug, Default)]
pub struct ScriptedEncoder {
    events: VecDeque<EncoderEvent>,
}

impl ScriptedEncoder {
    pub fn new<I: IntoIterator<Item = EncoderEvent>>(events: I) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn push(&mut self, ev: EncoderEvent) {
        self.events.push_back(ev);
    }
}

impl EncoderInput for ScriptedEncoder {
    fn poll(&mut self) -> EncoderEvent {
        self.events.pop_front().unwrap_or_default()
    }
}
