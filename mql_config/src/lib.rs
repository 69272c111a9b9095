#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the MQL pump controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Every section defaults to the factory settings, so an empty file
//!   yields a runnable configuration.
//! - `validate()` applies the same range checks the controller applies
//!   when it decides whether a persisted settings block is trustworthy.
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Material {
    #[default]
    Steel,
    Aluminum,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DoseMode {
    #[default]
    Continuous,
    Pulsed,
}

/// BCM pin assignments for the control head and the stepper driver.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct Pins {
    pub enc_a: u8,
    pub enc_b: u8,
    pub enc_btn: u8,
    pub start_btn: u8,
    pub pump_step: u8,
    pub pump_dir: u8,
    pub pump_ena: u8,
    /// ADC channel of the flow potentiometer (MCP3008 input).
    pub pot_channel: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            enc_a: 17,
            enc_b: 27,
            enc_btn: 22,
            start_btn: 5,
            pump_step: 12,
            pump_dir: 16,
            pump_ena: 26,
            pot_channel: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct DosingCfg {
    pub material: Material,
    pub cutter_mm: u8,
    pub mode: DoseMode,
    pub pulse_on_ms: u16,
    pub pulse_off_ms: u16,
    /// Cache of the last recommended flow (x100), kept for the display.
    pub last_rec_x100: u16,
}

impl Default for DosingCfg {
    fn default() -> Self {
        Self {
            material: Material::Steel,
            cutter_mm: 10,
            mode: DoseMode::Continuous,
            pulse_on_ms: 500,
            pulse_off_ms: 2000,
            last_rec_x100: 55,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct FlowCfg {
    /// Pot fully CCW maps to recommended * kmin (x100).
    pub kmin_x100: u16,
    /// Pot fully CW maps to recommended * kmax (x100).
    pub kmax_x100: u16,
    /// Aluminum flow as a multiple of the steel base (x100).
    pub al_factor_x100: u16,
}

impl Default for FlowCfg {
    fn default() -> Self {
        Self {
            kmin_x100: 50,
            kmax_x100: 200,
            al_factor_x100: 130,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct PotCfg {
    /// Moving-average depth for raw ADC samples.
    pub avg_n: u8,
    /// Setpoint hysteresis in flow units (x100); changes below it are held.
    pub hyst_x100: u8,
    /// Full-scale raw reading of the ADC.
    pub adc_max: u16,
}

impl Default for PotCfg {
    fn default() -> Self {
        Self {
            avg_n: 8,
            hyst_x100: 2,
            adc_max: 1023,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct PumpCfg {
    /// Stepper steps per minute produced by one flow unit per minute.
    pub gain_steps_per_u_min: u32,
    pub steps_per_rev: u32,
    /// DM556-style drivers enable on a low ENA level.
    pub ena_active_low: bool,
    /// Level to hold the DIR line at; the pump only runs forward.
    pub dir_high: bool,
}

impl Default for PumpCfg {
    fn default() -> Self {
        Self {
            gain_steps_per_u_min: 1000,
            steps_per_rev: 3200,
            ena_active_low: true,
            dir_high: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct EncoderCfg {
    /// Quadrature edges that make up one mechanical detent (4 for KY-040,
    /// 2 for some EC11 variants).
    pub detent_edges: u8,
    pub invert: bool,
    /// Edges arriving closer together than this are treated as bounce.
    pub min_edge_us: u16,
    /// Minimum pause between emitted detents (not between edges).
    pub step_guard_ms: u8,
    pub btn_debounce_ms: u8,
    pub btn_long_ms: u16,
}

impl Default for EncoderCfg {
    fn default() -> Self {
        Self {
            detent_edges: 4,
            invert: false,
            min_edge_us: 300,
            step_guard_ms: 2,
            btn_debounce_ms: 25,
            btn_long_ms: 600,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct CalibrationCfg {
    pub calibrated: bool,
    /// Milliliters dispensed per flow unit (x1000); 0 while uncalibrated.
    pub ml_per_u_x1000: u32,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            calibrated: false,
            ml_per_u_x1000: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct TimingCfg {
    /// Input poll period for encoder/button/pot sampling.
    pub input_poll_ms: u64,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self { input_poll_ms: 5 }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub pins: Pins,
    pub dosing: DosingCfg,
    pub flow: FlowCfg,
    pub pot: PotCfg,
    pub pump: PumpCfg,
    pub encoder: EncoderCfg,
    pub calibration: CalibrationCfg,
    pub timing: TimingCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Serialize a configuration back to TOML, for persisting panel edits.
pub fn to_toml(cfg: &Config) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(cfg)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Dosing
        if self.dosing.cutter_mm < 1 || self.dosing.cutter_mm > 60 {
            eyre::bail!("dosing.cutter_mm must be in [1, 60]");
        }
        if self.dosing.pulse_on_ms < 10 || self.dosing.pulse_on_ms > 10000 {
            eyre::bail!("dosing.pulse_on_ms must be in [10, 10000]");
        }
        if self.dosing.pulse_off_ms < 10 || self.dosing.pulse_off_ms > 60000 {
            eyre::bail!("dosing.pulse_off_ms must be in [10, 60000]");
        }
        if self.dosing.last_rec_x100 < 1 || self.dosing.last_rec_x100 > 50000 {
            eyre::bail!("dosing.last_rec_x100 must be in [1, 50000]");
        }

        // Flow factors (x100)
        if self.flow.kmin_x100 < 10 || self.flow.kmin_x100 > 300 {
            eyre::bail!("flow.kmin_x100 must be in [10, 300] (0.10x .. 3.00x)");
        }
        if self.flow.kmax_x100 < 20 || self.flow.kmax_x100 > 600 {
            eyre::bail!("flow.kmax_x100 must be in [20, 600] (0.20x .. 6.00x)");
        }
        if self.flow.kmax_x100 <= self.flow.kmin_x100 {
            eyre::bail!("flow.kmax_x100 must be greater than flow.kmin_x100");
        }
        if self.flow.al_factor_x100 < 50 || self.flow.al_factor_x100 > 300 {
            eyre::bail!("flow.al_factor_x100 must be in [50, 300]");
        }

        // Pot conditioning
        if self.pot.avg_n < 1 || self.pot.avg_n > 32 {
            eyre::bail!("pot.avg_n must be in [1, 32]");
        }
        if self.pot.hyst_x100 > 50 {
            eyre::bail!("pot.hyst_x100 must be <= 50");
        }
        if self.pot.adc_max == 0 {
            eyre::bail!("pot.adc_max must be >= 1");
        }

        // Pump
        if self.pump.gain_steps_per_u_min < 1 || self.pump.gain_steps_per_u_min > 2_000_000 {
            eyre::bail!("pump.gain_steps_per_u_min must be in [1, 2000000]");
        }
        if self.pump.steps_per_rev < 200 || self.pump.steps_per_rev > 50000 {
            eyre::bail!("pump.steps_per_rev must be in [200, 50000]");
        }

        // Encoder
        if self.encoder.detent_edges != 2 && self.encoder.detent_edges != 4 {
            eyre::bail!("encoder.detent_edges must be 2 or 4");
        }
        if self.encoder.btn_debounce_ms == 0 {
            eyre::bail!("encoder.btn_debounce_ms must be >= 1");
        }
        if self.encoder.btn_long_ms == 0 {
            eyre::bail!("encoder.btn_long_ms must be >= 1");
        }

        // Calibration: a calibrated flag with a nonsense factor is rejected,
        // uncalibrated ignores the stored factor entirely.
        if self.calibration.calibrated
            && (self.calibration.ml_per_u_x1000 == 0
                || self.calibration.ml_per_u_x1000 > 5_000_000)
        {
            eyre::bail!("calibration.ml_per_u_x1000 must be in [1, 5000000] when calibrated");
        }

        // Timing
        if self.timing.input_poll_ms == 0 {
            eyre::bail!("timing.input_poll_ms must be >= 1");
        }

        Ok(())
    }
}
