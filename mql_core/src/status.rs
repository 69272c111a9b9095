//! Display-facing snapshot emitted after each control loop iteration.

use crate::calibration::CalPhase;
use crate::dosing::RunState;

/// Everything an external display needs to render one frame. The core
/// issues no draw calls; it hands this out and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySnapshot {
    /// Recommended flow for the current material/tool, u/min x100.
    pub recommended_x100: i32,
    /// Pot-mapped target flow, u/min x100.
    pub target_x100: i32,
    /// Dosing state machine position.
    pub run_state: RunState,
    /// Planned step frequency while running, Hz.
    pub rate_hz: u32,
    /// Calibration session position.
    pub cal_phase: CalPhase,
    /// Seconds left in a running calibration session.
    pub cal_remaining_secs: u32,
    /// Entered volume so far while awaiting the measurement, ml x100.
    pub cal_volume_x100: u32,
    /// Digit cursor of the volume editor.
    pub cal_volume_cursor: usize,
    /// Stored factor, ml/u x1000 (0 while uncalibrated).
    pub ml_per_u_x1000: u32,
    pub calibrated: bool,
}
