//! `From` implementations bridging `mql_config` types to `mql_core` types.
//!
//! These eliminate the manual field-by-field mapping previously scattered in the CLI.

use crate::config::{Configuration, DoseMode, EncoderTuning, Material};

// ── Material ─────────────────────────────────────────────────────────────────

impl From<mql_config::Material> for Material {
    fn from(m: mql_config::Material) -> Self {
        match m {
            mql_config::Material::Steel => Material::Steel,
            mql_config::Material::Aluminum => Material::Aluminum,
        }
    }
}

// ── DoseMode ─────────────────────────────────────────────────────────────────

impl From<mql_config::DoseMode> for DoseMode {
    fn from(m: mql_config::DoseMode) -> Self {
        match m {
            mql_config::DoseMode::Continuous => DoseMode::Continuous,
            mql_config::DoseMode::Pulsed => DoseMode::Pulsed,
        }
    }
}

// ── EncoderTuning ────────────────────────────────────────────────────────────

impl From<&mql_config::EncoderCfg> for EncoderTuning {
    fn from(c: &mql_config::EncoderCfg) -> Self {
        Self {
            detent_edges: c.detent_edges,
            invert: c.invert,
            min_edge_us: u32::from(c.min_edge_us),
            step_guard_ms: u32::from(c.step_guard_ms),
            btn_debounce_ms: u32::from(c.btn_debounce_ms),
            btn_long_ms: u32::from(c.btn_long_ms),
        }
    }
}

impl From<Material> for mql_config::Material {
    fn from(m: Material) -> Self {
        match m {
            Material::Steel => mql_config::Material::Steel,
            Material::Aluminum => mql_config::Material::Aluminum,
        }
    }
}

impl From<DoseMode> for mql_config::DoseMode {
    fn from(m: DoseMode) -> Self {
        match m {
            DoseMode::Continuous => mql_config::DoseMode::Continuous,
            DoseMode::Pulsed => mql_config::DoseMode::Pulsed,
        }
    }
}

/// Copy the panel-editable state back into the persisted shape, leaving the
/// installation sections (pins, encoder tuning, timing, logging) untouched.
pub fn write_back(run: &Configuration, file: &mut mql_config::Config) {
    file.dosing.material = run.material.into();
    file.dosing.cutter_mm = run.cutter_mm;
    file.dosing.mode = run.mode.into();
    file.dosing.pulse_on_ms = run.pulse_on_ms;
    file.dosing.pulse_off_ms = run.pulse_off_ms;
    file.dosing.last_rec_x100 = run.last_rec_x100.clamp(1, 50_000) as u16;
    file.flow.kmin_x100 = run.kmin_x100;
    file.flow.kmax_x100 = run.kmax_x100;
    file.flow.al_factor_x100 = run.al_factor_x100;
    file.pot.avg_n = run.pot_avg_n;
    file.pot.hyst_x100 = run.pot_hyst_x100;
    file.pot.adc_max = run.adc_max;
    file.pump.gain_steps_per_u_min = run.pump_gain_steps_per_u_min;
    file.pump.steps_per_rev = run.steps_per_rev;
    file.pump.ena_active_low = run.ena_active_low;
    file.calibration.calibrated = run.calibrated;
    file.calibration.ml_per_u_x1000 = run.ml_per_u_x1000;
}

// ── Configuration ────────────────────────────────────────────────────────────

impl From<&mql_config::Config> for Configuration {
    fn from(c: &mql_config::Config) -> Self {
        Self {
            material: c.dosing.material.into(),
            cutter_mm: c.dosing.cutter_mm,
            mode: c.dosing.mode.into(),
            pulse_on_ms: c.dosing.pulse_on_ms,
            pulse_off_ms: c.dosing.pulse_off_ms,
            kmin_x100: c.flow.kmin_x100,
            kmax_x100: c.flow.kmax_x100,
            al_factor_x100: c.flow.al_factor_x100,
            pot_avg_n: c.pot.avg_n,
            pot_hyst_x100: c.pot.hyst_x100,
            adc_max: c.pot.adc_max,
            pump_gain_steps_per_u_min: c.pump.gain_steps_per_u_min,
            steps_per_rev: c.pump.steps_per_rev,
            ena_active_low: c.pump.ena_active_low,
            calibrated: c.calibration.calibrated,
            ml_per_u_x1000: c.calibration.ml_per_u_x1000,
            last_rec_x100: i32::from(c.dosing.last_rec_x100),
            encoder: (&c.encoder).into(),
        }
    }
}
