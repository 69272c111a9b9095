//! Maps `Box<dyn Error>` from trait boundaries to typed `PumpError`.
//!
//! The traits in `mql_traits` use `Box<dyn Error + Send + Sync>` for maximum
//! flexibility; this module converts those to our typed error enum, with an
//! optional feature-gated path for `mql_hardware::HwError` downcasting.

use crate::error::PumpError;

/// Map a trait-boundary error to a typed `PumpError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> PumpError {
    // Feature-gated: try to downcast to HwError for precise mapping
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<mql_hardware::error::HwError>() {
            return PumpError::HardwareFault(hw.to_string());
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("fault") {
        PumpError::HardwareFault(s)
    } else {
        PumpError::Hardware(s)
    }
}
