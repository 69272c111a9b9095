//! Operator control loop: routes decoded input, tracks the pot-mapped
//! setpoint, and orchestrates dosing and calibration.
//!
//! The loop owns the [`Configuration`] for its lifetime and never persists
//! it; persistence requests queue up as [`SettingsRequest`]s for the
//! embedding binary to execute.

use std::time::Instant;

use mql_traits::EnableLine;
use mql_traits::clock::Clock;

use crate::actions::{ControlAction, SettingsRequest};
use crate::calibration::{CAL_REF_RATE_X100, CalDuration, CalibrationEngine};
use crate::config::{AdjustOutcome, Configuration, ParamField};
use crate::dosing::{DosingController, RunState};
use crate::encoder::EncoderEvent;
use crate::error::Result;
use crate::flow::{self, PotFilter, SetpointHysteresis};
use crate::input::InputSample;
use crate::status::DisplaySnapshot;

pub struct ControlLoop<E: EnableLine, C: Clock> {
    cfg: Configuration,
    controller: DosingController<E, C>,
    cal: CalibrationEngine,
    pot: PotFilter,
    setpoint: SetpointHysteresis,
    clock: C,
    epoch: Instant,
    requests: Vec<SettingsRequest>,
    run_requested: bool,
    target_x100: i32,
}

impl<E: EnableLine, C: Clock> ControlLoop<E, C> {
    pub fn new(cfg: Configuration, controller: DosingController<E, C>, clock: C) -> Self {
        let pot = PotFilter::new(cfg.pot_avg_n);
        let epoch = clock.now();
        Self {
            cfg,
            controller,
            cal: CalibrationEngine::new(),
            pot,
            setpoint: SetpointHysteresis::new(),
            clock,
            epoch,
            requests: Vec::new(),
            run_requested: false,
            target_x100: 0,
        }
    }

    /// Drive the enable line to its disabled level and seed the cached
    /// recommendation. Call once before the first [`step`](Self::step).
    pub fn begin(&mut self) -> Result<()> {
        self.controller.begin()?;
        let rec = flow::recompute_recommendation(&mut self.cfg);
        tracing::info!(rec_x100 = rec, "control loop ready");
        Ok(())
    }

    #[inline]
    pub fn configuration(&self) -> &Configuration {
        &self.cfg
    }

    #[inline]
    pub fn calibration(&self) -> &CalibrationEngine {
        &self.cal
    }

    #[inline]
    pub fn run_requested(&self) -> bool {
        self.run_requested
    }

    #[inline]
    pub fn target_x100(&self) -> i32 {
        self.target_x100
    }

    /// Queued persistence requests, oldest first. Emptied on read.
    pub fn drain_requests(&mut self) -> Vec<SettingsRequest> {
        std::mem::take(&mut self.requests)
    }

    /// Feed one raw pot sample through the filter and refresh the target.
    pub fn on_pot(&mut self, raw: u16) {
        if self.pot.depth() != self.cfg.pot_avg_n {
            // averaging depth was edited; restart the filter
            self.pot = PotFilter::new(self.cfg.pot_avg_n);
        }
        let filtered = self.pot.update(raw);
        let target = flow::target_flow_x100(
            self.cfg.last_rec_x100,
            filtered,
            self.cfg.adc_max,
            self.cfg.kmin_x100,
            self.cfg.kmax_x100,
        );
        self.target_x100 = self.setpoint.update(target, self.cfg.pot_hyst_x100);
    }

    /// Start/stop press edge. Toggles dosing; ignored while a calibration
    /// session owns the pump or awaits its measurement.
    pub fn on_start_edge(&mut self) {
        if self.cal.is_running() || self.cal.is_awaiting_volume() {
            tracing::debug!("start ignored during calibration");
            return;
        }
        self.run_requested = !self.run_requested;
        tracing::info!(run = self.run_requested, "operator start toggle");
    }

    /// Route a decoded encoder event. Returns true when the event was
    /// consumed here (calibration owns the encoder); false leaves it to
    /// the embedding menu.
    pub fn on_encoder(&mut self, ev: EncoderEvent) -> Result<bool> {
        if self.cal.is_running() {
            if ev.hold {
                self.cal.abort();
                self.controller.stop()?;
            }
            return Ok(true);
        }

        if self.cal.is_awaiting_volume() {
            if ev.hold {
                self.cal.abort();
                return Ok(true);
            }
            if ev.step != 0 {
                self.cal.volume_mut().turn(ev.step);
            }
            if ev.click && self.cal.volume_mut().advance() {
                match self.cal.complete(&mut self.cfg) {
                    Ok(_) => self.requests.push(SettingsRequest::Persist),
                    Err(e) => tracing::warn!(error = %e, "calibration rejected"),
                }
            }
            return Ok(true);
        }

        Ok(false)
    }

    /// Edit a parameter the way the menu does, with the field's own clamps
    /// and step size. Recomputes the recommendation when the edit calls
    /// for it.
    pub fn adjust(&mut self, field: ParamField, delta: i32) -> AdjustOutcome {
        let out = self.cfg.adjust(field, delta);
        if out.recompute {
            flow::recompute_recommendation(&mut self.cfg);
            self.setpoint.reset();
        }
        out
    }

    /// Consume a one-shot menu command.
    pub fn apply(&mut self, action: ControlAction) -> Result<()> {
        match action {
            ControlAction::StartCal60 => self.start_calibration(CalDuration::S60),
            ControlAction::StartCal120 => self.start_calibration(CalDuration::S120),
            ControlAction::ClearCal => {
                self.cal.clear(&mut self.cfg);
                self.requests.push(SettingsRequest::Persist);
                Ok(())
            }
            ControlAction::Recompute => {
                flow::recompute_recommendation(&mut self.cfg);
                self.setpoint.reset();
                Ok(())
            }
            ControlAction::Save => {
                self.requests.push(SettingsRequest::Persist);
                Ok(())
            }
            ControlAction::LoadDefaults => {
                self.controller.stop()?;
                self.cal.abort();
                self.run_requested = false;
                self.cfg = Configuration::default();
                flow::recompute_recommendation(&mut self.cfg);
                self.pot = PotFilter::new(self.cfg.pot_avg_n);
                self.setpoint.reset();
                self.requests.push(SettingsRequest::ResetToDefaults);
                tracing::info!("factory defaults applied");
                Ok(())
            }
        }
    }

    fn start_calibration(&mut self, duration: CalDuration) -> Result<()> {
        self.run_requested = false;
        let now = self.now_ms();
        self.cal.start(duration, now);
        self.controller.run_continuous(&self.cfg, CAL_REF_RATE_X100)
    }

    /// Advance time-based work: the calibration session clock and the
    /// dosing state machine. Returns the display snapshot for this frame.
    pub fn tick(&mut self) -> Result<DisplaySnapshot> {
        let now = self.now_ms();

        if self.cal.is_running() {
            if self.cal.tick(now) {
                self.controller.stop()?;
            } else {
                // reference rate, regardless of the configured mode
                self.controller.run_continuous(&self.cfg, CAL_REF_RATE_X100)?;
            }
        } else if self.run_requested {
            if self.controller.state() == RunState::Stopped {
                self.controller.start(&self.cfg, self.target_x100)?;
            } else {
                self.controller.tick(&self.cfg, self.target_x100)?;
            }
        } else if self.controller.is_running() {
            self.controller.stop()?;
        }

        Ok(self.snapshot(now))
    }

    /// Route one merged input sample, then advance. Convenience for the
    /// common embedding; callers with their own menu use the `on_*`
    /// methods directly so unconsumed encoder events reach it.
    pub fn step(&mut self, sample: InputSample) -> Result<DisplaySnapshot> {
        if let Some(raw) = sample.pot_raw {
            self.on_pot(raw);
        }
        if sample.start {
            self.on_start_edge();
        }
        if !sample.event.is_empty() {
            self.on_encoder(sample.event)?;
        }
        self.tick()
    }

    fn snapshot(&self, now_ms: u64) -> DisplaySnapshot {
        DisplaySnapshot {
            recommended_x100: self.cfg.last_rec_x100,
            target_x100: self.target_x100,
            run_state: self.controller.state(),
            rate_hz: if self.controller.is_running() {
                self.controller.rate_hz()
            } else {
                0
            },
            cal_phase: self.cal.phase(),
            cal_remaining_secs: self.cal.remaining_secs(now_ms),
            cal_volume_x100: self.cal.volume().ml_x100(),
            cal_volume_cursor: self.cal.volume().cursor(),
            ml_per_u_x1000: self.cfg.ml_per_u_x1000,
            calibrated: self.cfg.calibrated,
        }
    }

    #[inline]
    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }
}
