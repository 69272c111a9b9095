//! Flow recommendation and pot-to-setpoint mapping.
//!
//! Recommended flow is a diameter-keyed steel baseline in abstract units
//! per minute (x100); aluminum scales it by a configured factor. The
//! operator pot then picks an actual setpoint between `recommended * kmin`
//! and `recommended * kmax`. All arithmetic is integer with 64-bit
//! intermediates and truncation, matching the panel's fixed-point behavior.

use crate::config::{Configuration, Material};
use crate::fixed_point::{lerp_x100, scale_by_factor_x100};

/// Steel baseline by cutter diameter, in flow units x100.
#[inline]
fn steel_base_x100(cutter_mm: u8) -> i32 {
    if cutter_mm <= 6 {
        35
    } else if cutter_mm <= 12 {
        55
    } else if cutter_mm <= 25 {
        90
    } else {
        140
    }
}

/// Recommended flow (x100) for a material and cutter diameter.
///
/// Aluminum applies `al_factor_x100` to the steel base and never drops
/// below 0.01 units/min.
pub fn recommended_flow_x100(material: Material, cutter_mm: u8, al_factor_x100: u16) -> i32 {
    let steel = steel_base_x100(cutter_mm);
    match material {
        Material::Steel => steel,
        Material::Aluminum => scale_by_factor_x100(steel, al_factor_x100).max(1),
    }
}

/// Map a raw pot reading onto the `[rec*kmin, rec*kmax]` band (x100).
///
/// `pot_raw` is clamped to `adc_max`; the result is clamped to be
/// non-negative (the endpoints can only go negative through a nonsense
/// recommended value, and even then the caller sees a safe zero).
pub fn target_flow_x100(
    rec_x100: i32,
    pot_raw: u16,
    adc_max: u16,
    kmin_x100: u16,
    kmax_x100: u16,
) -> i32 {
    let lo = scale_by_factor_x100(rec_x100, kmin_x100);
    let hi = scale_by_factor_x100(rec_x100, kmax_x100);
    let set = lerp_x100(lo, hi, u32::from(pot_raw), u32::from(adc_max));
    set.max(0)
}

/// Refresh the recommendation after a material/tool edit and cache it so
/// displays can show it without recomputing.
pub fn recompute_recommendation(cfg: &mut Configuration) -> i32 {
    let rec = recommended_flow_x100(cfg.material, cfg.cutter_mm, cfg.al_factor_x100);
    cfg.last_rec_x100 = rec;
    rec
}

/// Integer moving average over raw pot samples: `(avg*(n-1) + raw) / n`.
///
/// The first sample seeds the average so startup does not ramp from zero.
#[derive(Debug, Clone, Copy)]
pub struct PotFilter {
    n: u16,
    avg: Option<u16>,
}

impl PotFilter {
    pub fn new(avg_n: u8) -> Self {
        Self {
            n: u16::from(avg_n.max(1)),
            avg: None,
        }
    }

    pub fn update(&mut self, raw: u16) -> u16 {
        let next = match self.avg {
            None => raw,
            Some(avg) => {
                let n = u32::from(self.n);
                ((u32::from(avg) * (n - 1) + u32::from(raw)) / n) as u16
            }
        };
        self.avg = Some(next);
        next
    }

    pub fn value(&self) -> u16 {
        self.avg.unwrap_or(0)
    }

    /// Configured averaging depth.
    pub fn depth(&self) -> u8 {
        self.n as u8
    }
}

/// Holds the active flow setpoint until a candidate moves by more than the
/// configured hysteresis, so pot jitter does not retune the pump.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetpointHysteresis {
    current_x100: Option<i32>,
}

impl SetpointHysteresis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept or reject `candidate_x100`; returns the active setpoint.
    pub fn update(&mut self, candidate_x100: i32, hyst_x100: u8) -> i32 {
        match self.current_x100 {
            None => {
                self.current_x100 = Some(candidate_x100);
                candidate_x100
            }
            Some(cur) => {
                if (candidate_x100 - cur).unsigned_abs() > u32::from(hyst_x100) {
                    self.current_x100 = Some(candidate_x100);
                    candidate_x100
                } else {
                    cur
                }
            }
        }
    }

    /// Force the next update to be taken as-is.
    pub fn reset(&mut self) {
        self.current_x100 = None;
    }

    pub fn value_x100(&self) -> Option<i32> {
        self.current_x100
    }
}
