//! Runtime configuration for the pump controller.
//!
//! These are the plain structs threaded through the control core by
//! reference. They are separate from the TOML-deserialized schema in
//! `mql_config`; `conversions` bridges the two.

/// Workpiece material the recommendation table keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Material {
    Steel,
    Aluminum,
}

/// Actuation regime for a dosing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoseMode {
    /// Steady pulse train at the target rate.
    Continuous,
    /// Alternate between the target rate and silence on a fixed duty cycle.
    Pulsed,
}

/// Quadrature decoder and button tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderTuning {
    /// Signal edges per mechanical detent (4 for KY-040, 2 for some EC11).
    pub detent_edges: u8,
    /// Flip the sign of emitted detents.
    pub invert: bool,
    /// Edges closer together than this are bounce and are dropped.
    pub min_edge_us: u32,
    /// Minimum pause between emitted detents (not between edges).
    pub step_guard_ms: u32,
    pub btn_debounce_ms: u32,
    pub btn_long_ms: u32,
}

impl Default for EncoderTuning {
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

/// The full operator-visible settings block.
///
/// Mirrors the persisted settings of the control head; an external settings
/// manager owns load/save, the core only reads and (for calibration and
/// parameter edits) mutates the in-memory copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub material: Material,
    pub cutter_mm: u8,
    pub mode: DoseMode,
    pub pulse_on_ms: u16,
    pub pulse_off_ms: u16,

    /// Pot fully CCW maps to recommended * kmin (x100).
    pub kmin_x100: u16,
    /// Pot fully CW maps to recommended * kmax (x100).
    pub kmax_x100: u16,
    /// Aluminum flow as a multiple of the steel base (x100).
    pub al_factor_x100: u16,

    /// Moving-average depth for pot samples.
    pub pot_avg_n: u8,
    /// Setpoint hysteresis in flow units (x100).
    pub pot_hyst_x100: u8,
    /// Full-scale raw ADC reading.
    pub adc_max: u16,

    /// Stepper steps per minute produced by one flow unit per minute.
    pub pump_gain_steps_per_u_min: u32,
    pub steps_per_rev: u32,
    /// DM556-style drivers enable on a low ENA level.
    pub ena_active_low: bool,

    pub calibrated: bool,
    /// Milliliters per flow unit (x1000); 0 while uncalibrated.
    pub ml_per_u_x1000: u32,

    /// Cache of the last recommended flow (x100), kept for the display.
    pub last_rec_x100: i32,

    pub encoder: EncoderTuning,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            material: Material::Steel,
            cutter_mm: 10,
            mode: DoseMode::Continuous,
            pulse_on_ms: 500,
            pulse_off_ms: 2000,
            kmin_x100: 50,
            kmax_x100: 200,
            al_factor_x100: 130,
            pot_avg_n: 8,
            pot_hyst_x100: 2,
            adc_max: 1023,
            pump_gain_steps_per_u_min: 1000,
            steps_per_rev: 3200,
            ena_active_low: true,
            calibrated: false,
            ml_per_u_x1000: 0,
            last_rec_x100: 55,
            encoder: EncoderTuning::default(),
        }
    }
}

/// Operator-adjustable parameter, one detent of rotation per `adjust` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamField {
    Material,
    CutterMm,
    Mode,
    PulseOnMs,
    PulseOffMs,
    KminX100,
    KmaxX100,
    AlFactorX100,
    PotAvgN,
    PotHystX100,
    PumpGain,
}

/// Result of one parameter adjustment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdjustOutcome {
    /// The stored value actually changed.
    pub changed: bool,
    /// The recommended flow depends on this field and must be recomputed.
    pub recompute: bool,
}

#[inline]
fn clamp_i32(v: i32, lo: i32, hi: i32) -> i32 {
    v.clamp(lo, hi)
}

impl Configuration {
    /// Apply one rotation delta to an editable field, with the same step
    /// sizes and clamp ranges the control head enforces.
    pub fn adjust(&mut self, field: ParamField, delta: i32) -> AdjustOutcome {
        if delta == 0 {
            return AdjustOutcome::default();
        }
        match field {
            ParamField::Material => {
                let next = if delta > 0 {
                    Material::Aluminum
                } else {
                    Material::Steel
                };
                let changed = next != self.material;
                self.material = next;
                AdjustOutcome {
                    changed,
                    recompute: true,
                }
            }
            ParamField::CutterMm => {
                let next = clamp_i32(i32::from(self.cutter_mm) + delta, 3, 50) as u8;
                let changed = next != self.cutter_mm;
                self.cutter_mm = next;
                AdjustOutcome {
                    changed,
                    recompute: true,
                }
            }
            ParamField::Mode => {
                self.mode = match self.mode {
                    DoseMode::Continuous => DoseMode::Pulsed,
                    DoseMode::Pulsed => DoseMode::Continuous,
                };
                AdjustOutcome {
                    changed: true,
                    recompute: false,
                }
            }
            ParamField::PulseOnMs => {
                let next = clamp_i32(i32::from(self.pulse_on_ms) + delta * 50, 100, 5000) as u16;
                let changed = next != self.pulse_on_ms;
                self.pulse_on_ms = next;
                AdjustOutcome {
                    changed,
                    recompute: false,
                }
            }
            ParamField::PulseOffMs => {
                let next = clamp_i32(i32::from(self.pulse_off_ms) + delta * 100, 100, 10000) as u16;
                let changed = next != self.pulse_off_ms;
                self.pulse_off_ms = next;
                AdjustOutcome {
                    changed,
                    recompute: false,
                }
            }
            ParamField::KminX100 => {
                let next = clamp_i32(i32::from(self.kmin_x100) + delta * 2, 20, 100) as u16;
                let changed = next != self.kmin_x100;
                self.kmin_x100 = next;
                AdjustOutcome {
                    changed,
                    recompute: true,
                }
            }
            ParamField::KmaxX100 => {
                let next = clamp_i32(i32::from(self.kmax_x100) + delta * 5, 120, 400) as u16;
                let changed = next != self.kmax_x100;
                self.kmax_x100 = next;
                AdjustOutcome {
                    changed,
                    recompute: true,
                }
            }
            ParamField::AlFactorX100 => {
                let next = clamp_i32(i32::from(self.al_factor_x100) + delta * 2, 100, 200) as u16;
                let changed = next != self.al_factor_x100;
                self.al_factor_x100 = next;
                AdjustOutcome {
                    changed,
                    recompute: true,
                }
            }
            ParamField::PotAvgN => {
                // Fixed ladder: 4 <-> 8 <-> 16.
                let next = if delta > 0 {
                    match self.pot_avg_n {
                        4 => 8,
                        8 => 16,
                        n => n,
                    }
                } else {
                    match self.pot_avg_n {
                        16 => 8,
                        8 => 4,
                        n => n,
                    }
                };
                let changed = next != self.pot_avg_n;
                self.pot_avg_n = next;
                AdjustOutcome {
                    changed,
                    recompute: false,
                }
            }
            ParamField::PotHystX100 => {
                let next = clamp_i32(i32::from(self.pot_hyst_x100) + delta, 0, 50) as u8;
                let changed = next != self.pot_hyst_x100;
                self.pot_hyst_x100 = next;
                AdjustOutcome {
                    changed,
                    recompute: false,
                }
            }
            ParamField::PumpGain => {
                let next = clamp_i32(
                    self.pump_gain_steps_per_u_min.min(i32::MAX as u32) as i32 + delta * 50,
                    50,
                    50000,
                ) as u32;
                let changed = next != self.pump_gain_steps_per_u_min;
                self.pump_gain_steps_per_u_min = next;
                AdjustOutcome {
                    changed,
                    recompute: false,
                }
            }
        }
    }
}
