//! Dosing state machine: continuous and pulsed pump regimes.
//!
//! Flow setpoints arrive as units/min x100; the pump gain turns them into
//! steps/min (64-bit product, truncated), which become a step frequency by
//! ceiling division so any nonzero demand yields at least 1 Hz. A demand
//! that rounds to zero steps/min does not get a minimum frequency: it stops
//! the pump, from any state.
//!
//! Pulsed mode alternates between the target rate and silence on the
//! configured on/off durations (floored at 10 ms), switching phases from
//! the control tick based on elapsed time.

use std::time::Instant;

use mql_traits::EnableLine;
use mql_traits::clock::Clock;

use crate::config::{Configuration, DoseMode};
use crate::error::Result;
use crate::pulse::{MAX_STEP_HZ, MIN_STEP_HZ, StepPulseGenerator};

/// Shortest usable pulse phase.
pub const PULSE_PHASE_MIN_MS: u64 = 10;

/// Run state of the dosing controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    RunContinuous,
    /// Pulsed regime, currently emitting.
    RunPulseOn,
    /// Pulsed regime, currently silent.
    RunPulseOff,
}

impl RunState {
    #[inline]
    pub fn is_running(self) -> bool {
        !matches!(self, RunState::Stopped)
    }
}

/// Steps per minute for a flow demand (x100) and pump gain.
/// Non-positive flow is zero demand.
#[inline]
pub fn steps_per_min(flow_x100: i32, gain_steps_per_u_min: u32) -> u64 {
    if flow_x100 <= 0 {
        return 0;
    }
    (flow_x100 as u64 * u64::from(gain_steps_per_u_min)) / 100
}

/// Step frequency for a nonzero steps/min demand: ceiling division by 60,
/// clamped to the usable band.
#[inline]
pub fn step_hz(steps_per_min: u64) -> u32 {
    let hz = steps_per_min.div_ceil(60);
    hz.clamp(u64::from(MIN_STEP_HZ), u64::from(MAX_STEP_HZ)) as u32
}

/// Drives a [`StepPulseGenerator`] through the continuous/pulsed regimes.
pub struct DosingController<E: EnableLine, C: Clock> {
    pulses: StepPulseGenerator<E>,
    clock: C,
    epoch: Instant,
    state: RunState,
    phase_start_ms: u64,
}

impl<E: EnableLine, C: Clock> DosingController<E, C> {
    pub fn new(pulses: StepPulseGenerator<E>, clock: C) -> Self {
        let epoch = clock.now();
        Self {
            pulses,
            clock,
            epoch,
            state: RunState::Stopped,
            phase_start_ms: 0,
        }
    }

    /// Put the driver into a known disabled state.
    pub fn begin(&mut self) -> Result<()> {
        self.pulses.begin()
    }

    #[inline]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Step frequency currently planned (meaningful while running).
    #[inline]
    pub fn rate_hz(&self) -> u32 {
        self.pulses.rate_hz()
    }

    #[inline]
    pub fn pulses_emitted(&self) -> u64 {
        self.pulses.pulses_emitted()
    }

    pub fn generator(&self) -> &StepPulseGenerator<E> {
        &self.pulses
    }

    /// Start dosing in the configured mode at `flow_x100`.
    pub fn start(&mut self, cfg: &Configuration, flow_x100: i32) -> Result<()> {
        match cfg.mode {
            DoseMode::Continuous => self.run_continuous(cfg, flow_x100),
            DoseMode::Pulsed => self.run_pulsed(cfg, flow_x100),
        }
    }

    /// Run steadily at `flow_x100`, regardless of the configured mode.
    /// Calibration uses this directly with its reference rate.
    pub fn run_continuous(&mut self, cfg: &Configuration, flow_x100: i32) -> Result<()> {
        if !self.apply_rate(cfg, flow_x100)? {
            return Ok(());
        }
        if self.state != RunState::RunContinuous {
            tracing::info!(flow_x100, hz = self.pulses.rate_hz(), "dosing start (continuous)");
        }
        self.state = RunState::RunContinuous;
        Ok(())
    }

    /// Enter the pulsed regime, starting with an ON phase.
    pub fn run_pulsed(&mut self, cfg: &Configuration, flow_x100: i32) -> Result<()> {
        if !self.apply_rate(cfg, flow_x100)? {
            return Ok(());
        }
        tracing::info!(
            flow_x100,
            hz = self.pulses.rate_hz(),
            on_ms = cfg.pulse_on_ms,
            off_ms = cfg.pulse_off_ms,
            "dosing start (pulsed)"
        );
        self.state = RunState::RunPulseOn;
        self.phase_start_ms = self.clock.ms_since(self.epoch);
        Ok(())
    }

    /// Stop emitting and disable the driver. Always reachable.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != RunState::Stopped {
            tracing::info!(pulses = self.pulses.pulses_emitted(), "dosing stop");
        }
        self.state = RunState::Stopped;
        self.pulses.set_enabled(false)
    }

    /// Periodic control tick: re-applies the flow demand and advances the
    /// pulsed-phase schedule. `flow_x100` is the current setpoint (pot
    /// already mapped); zero demand stops the pump from any state.
    pub fn tick(&mut self, cfg: &Configuration, flow_x100: i32) -> Result<RunState> {
        if self.state == RunState::Stopped {
            return Ok(self.state);
        }

        if steps_per_min(flow_x100, cfg.pump_gain_steps_per_u_min) == 0 {
            self.stop()?;
            return Ok(self.state);
        }

        // A mode edit while running restarts the regime cleanly.
        match (cfg.mode, self.state) {
            (DoseMode::Continuous, RunState::RunPulseOn | RunState::RunPulseOff) => {
                self.run_continuous(cfg, flow_x100)?;
                return Ok(self.state);
            }
            (DoseMode::Pulsed, RunState::RunContinuous) => {
                self.run_pulsed(cfg, flow_x100)?;
                return Ok(self.state);
            }
            _ => {}
        }

        let now_ms = self.clock.ms_since(self.epoch);
        match self.state {
            RunState::RunContinuous => {
                self.apply_rate(cfg, flow_x100)?;
            }
            RunState::RunPulseOn => {
                let on_ms = u64::from(cfg.pulse_on_ms).max(PULSE_PHASE_MIN_MS);
                if now_ms.saturating_sub(self.phase_start_ms) >= on_ms {
                    tracing::debug!("pulse phase -> off");
                    self.pulses.set_enabled(false)?;
                    self.state = RunState::RunPulseOff;
                    self.phase_start_ms = now_ms;
                } else {
                    self.apply_rate(cfg, flow_x100)?;
                }
            }
            RunState::RunPulseOff => {
                let off_ms = u64::from(cfg.pulse_off_ms).max(PULSE_PHASE_MIN_MS);
                if now_ms.saturating_sub(self.phase_start_ms) >= off_ms {
                    tracing::debug!("pulse phase -> on");
                    if self.apply_rate(cfg, flow_x100)? {
                        self.state = RunState::RunPulseOn;
                        self.phase_start_ms = now_ms;
                    }
                }
            }
            RunState::Stopped => {}
        }

        Ok(self.state)
    }

    /// Plan and enable the step rate for `flow_x100`. Returns false (after
    /// stopping) when the demand rounds to zero steps.
    fn apply_rate(&mut self, cfg: &Configuration, flow_x100: i32) -> Result<bool> {
        let spm = steps_per_min(flow_x100, cfg.pump_gain_steps_per_u_min);
        if spm == 0 {
            self.stop()?;
            return Ok(false);
        }
        let hz = step_hz(spm);
        self.pulses.set_rate_hz(hz);
        self.pulses.set_enabled(true)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_per_min_widens_and_truncates() {
        assert_eq!(steps_per_min(100, 1000), 1000);
        assert_eq!(steps_per_min(55, 1000), 550);
        // 0.35 * 1 gain / 100 truncates to 0 -> zero demand
        assert_eq!(steps_per_min(35, 1), 0);
        assert_eq!(steps_per_min(0, 1000), 0);
        assert_eq!(steps_per_min(-50, 1000), 0);
        // near the config maximums nothing overflows
        assert_eq!(steps_per_min(50_000, 2_000_000), 1_000_000_000);
    }

    #[test]
    fn step_hz_rounds_up_and_clamps() {
        assert_eq!(step_hz(1000), 17); // 16.67 -> 17
        assert_eq!(step_hz(60), 1);
        assert_eq!(step_hz(61), 2);
        assert_eq!(step_hz(1), 1);
        assert_eq!(step_hz(1_000_000_000), 2000);
    }
}
