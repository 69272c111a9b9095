//! One-shot command boundaries between the menu, the core, and the
//! external settings manager.

/// Menu-issued commands. Each is consumed exactly once by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Start a 60 s calibration run.
    StartCal60,
    /// Start a 120 s calibration run.
    StartCal120,
    /// Drop the stored calibration factor.
    ClearCal,
    /// A flow-relevant parameter was edited; refresh the recommendation.
    Recompute,
    /// Persist the current configuration.
    Save,
    /// Return the configuration to factory defaults.
    LoadDefaults,
}

/// Requests the core emits for the external settings manager to execute.
/// The core never persists anything itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsRequest {
    /// Write the configuration out as it stands now.
    Persist,
    /// Factory defaults were applied to the running configuration; persist
    /// them (the manager may keep fields the core does not know about).
    ResetToDefaults,
}
