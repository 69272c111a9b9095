//! Timed calibration sessions and the measured-volume editor.
//!
//! A session runs the pump for a fixed duration at a fixed reference rate,
//! independent of the operator pot. Afterwards the operator keys in the
//! volume actually dispensed, digit by digit, and the engine converts it
//! into the ml-per-unit factor the rest of the system scales by.

use crate::config::Configuration;
use crate::error::Result;

/// Reference unit rate a session doses at: 100.00 u/min.
pub const CAL_REF_RATE_X100: i32 = 10_000;

/// Upper bound the persistence layer accepts for the factor (5000 ml/u).
pub const ML_PER_U_MAX_X1000: u32 = 5_000_000;

/// Session length selected from the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalDuration {
    S60,
    S120,
}

impl CalDuration {
    #[inline]
    pub fn secs(self) -> u32 {
        match self {
            CalDuration::S60 => 60,
            CalDuration::S120 => 120,
        }
    }
}

/// Where a session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalPhase {
    Idle,
    /// Pump running at the reference rate.
    Running,
    /// Timed run finished; waiting for the measured volume.
    AwaitingVolume,
}

/// Digit positions of the measured-volume editor: tens, ones, tenths,
/// hundredths of a millilitre.
pub const VOLUME_DIGITS: usize = 4;

/// Four-digit editor over ml x100 (0.00 ..= 99.99 ml).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeEntry {
    digits: [u8; VOLUME_DIGITS],
    cursor: usize,
}

impl Default for VolumeEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeEntry {
    pub fn new() -> Self {
        Self { digits: [0; VOLUME_DIGITS], cursor: 0 }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Rotate: adjust the digit under the cursor, wrapping within 0..=9.
    /// Turns after the confirming click land on the last digit.
    pub fn turn(&mut self, delta: i8) {
        let idx = self.cursor.min(VOLUME_DIGITS - 1);
        let cur = i32::from(self.digits[idx]);
        self.digits[idx] = (cur + i32::from(delta)).rem_euclid(10) as u8;
    }

    /// Click: move to the next digit. Returns true once the cursor passes
    /// the last digit, i.e. the entry is confirmed.
    pub fn advance(&mut self) -> bool {
        self.cursor += 1;
        self.cursor >= VOLUME_DIGITS
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor.min(VOLUME_DIGITS - 1)
    }

    /// Entered volume as ml x100.
    pub fn ml_x100(&self) -> u32 {
        let [tens, ones, tenths, hundredths] = self.digits;
        u32::from(tens) * 1000
            + u32::from(ones) * 100
            + u32::from(tenths) * 10
            + u32::from(hundredths)
    }
}

/// Calibration factor (ml per flow unit, x1000) for a volume measured over
/// a timed run at the reference rate. Returns 0 when the volume is too
/// small to resolve a factor.
pub fn factor_x1000_for(ml_x100: u32, duration_secs: u32) -> u32 {
    let denom = u64::from(duration_secs) * CAL_REF_RATE_X100 as u64;
    if denom == 0 {
        return 0;
    }
    (u64::from(ml_x100) * 1000 * 60 / denom).min(u64::from(ML_PER_U_MAX_X1000)) as u32
}

/// Orchestrates the timed run and turns the measured volume into a
/// calibration factor.
#[derive(Debug)]
pub struct CalibrationEngine {
    phase: CalPhase,
    duration: CalDuration,
    started_ms: u64,
    volume: VolumeEntry,
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationEngine {
    pub fn new() -> Self {
        Self {
            phase: CalPhase::Idle,
            duration: CalDuration::S60,
            started_ms: 0,
            volume: VolumeEntry::new(),
        }
    }

    #[inline]
    pub fn phase(&self) -> CalPhase {
        self.phase
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.phase == CalPhase::Running
    }

    #[inline]
    pub fn is_awaiting_volume(&self) -> bool {
        self.phase == CalPhase::AwaitingVolume
    }

    #[inline]
    pub fn duration_secs(&self) -> u32 {
        self.duration.secs()
    }

    pub fn elapsed_secs(&self, now_ms: u64) -> u32 {
        if self.phase != CalPhase::Running {
            return 0;
        }
        let elapsed = now_ms.saturating_sub(self.started_ms) / 1000;
        (elapsed.min(u64::from(self.duration.secs()))) as u32
    }

    pub fn remaining_secs(&self, now_ms: u64) -> u32 {
        self.duration.secs().saturating_sub(self.elapsed_secs(now_ms))
    }

    /// Begin a timed run. The caller drives the pump at
    /// [`CAL_REF_RATE_X100`] for as long as [`is_running`](Self::is_running).
    pub fn start(&mut self, duration: CalDuration, now_ms: u64) {
        tracing::info!(secs = duration.secs(), "calibration run start");
        self.phase = CalPhase::Running;
        self.duration = duration;
        self.started_ms = now_ms;
        self.volume.reset();
    }

    /// Advance the session clock. Returns true exactly once, when the timed
    /// run completes; the caller must stop the pump and collect the volume.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if self.phase != CalPhase::Running {
            return false;
        }
        let target_ms = u64::from(self.duration.secs()) * 1000;
        if now_ms.saturating_sub(self.started_ms) >= target_ms {
            tracing::info!(secs = self.duration.secs(), "calibration run finished");
            self.phase = CalPhase::AwaitingVolume;
            self.volume.reset();
            return true;
        }
        false
    }

    /// Abandon the session at any point without touching the configuration.
    pub fn abort(&mut self) {
        if self.phase != CalPhase::Idle {
            tracing::info!("calibration aborted");
        }
        self.phase = CalPhase::Idle;
        self.volume.reset();
    }

    pub fn volume(&self) -> &VolumeEntry {
        &self.volume
    }

    pub fn volume_mut(&mut self) -> &mut VolumeEntry {
        &mut self.volume
    }

    /// Convert the entered volume into a calibration factor and mark the
    /// configuration calibrated. The caller persists afterwards.
    pub fn complete(&mut self, cfg: &mut Configuration) -> Result<u32> {
        if self.phase != CalPhase::AwaitingVolume {
            eyre::bail!("no calibration volume pending");
        }

        let factor = factor_x1000_for(self.volume.ml_x100(), self.duration.secs());
        if factor == 0 {
            self.abort();
            eyre::bail!("measured volume too small to calibrate");
        }

        cfg.calibrated = true;
        cfg.ml_per_u_x1000 = factor;
        self.phase = CalPhase::Idle;
        self.volume.reset();
        tracing::info!(ml_per_u_x1000 = factor, "calibration stored");
        Ok(factor)
    }

    /// Drop any stored factor and return the configuration to uncalibrated.
    pub fn clear(&mut self, cfg: &mut Configuration) {
        cfg.calibrated = false;
        cfg.ml_per_u_x1000 = 0;
        self.abort();
        tracing::info!("calibration cleared");
    }
}
