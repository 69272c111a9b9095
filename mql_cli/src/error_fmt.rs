//! Human-readable error descriptions and structured JSON error formatting.

use mql_core::PumpError;

/// Map an eyre::Report to a human-readable explanation with likely causes
/// and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(pe) = err.downcast_ref::<PumpError>() {
        return match pe {
            PumpError::HardwareFault(msg) => format!(
                "What happened: The pump drive reported a fault ({msg}).\nLikely causes: Stepper driver fault output, shorted or disconnected STEP/ENA wiring, or supply brownout.\nHow to fix: Power-cycle the driver, check wiring against [pins] in the config, then start a new run."
            ),
            PumpError::Hardware(msg) => format!(
                "What happened: A hardware access failed ({msg}).\nLikely causes: Wrong pin numbers, missing GPIO/SPI permission, or SPI not enabled.\nHow to fix: Check [pins] in the config, enable SPI on the Pi, and run with GPIO access."
            ),
            PumpError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. An empty file yields the factory defaults."
            ),
            PumpError::State(msg) => format!(
                "What happened: A command arrived in the wrong state ({msg}).\nLikely causes: Overlapping calibration and dosing requests.\nHow to fix: Finish or abort the current operation first."
            ),
            PumpError::Calibration(msg) => format!(
                "What happened: Calibration was rejected ({msg}).\nLikely causes: Measured volume too small for the reference run, or no session pending.\nHow to fix: Re-run the timed dispense and enter the volume actually collected."
            ),
        };
    }

    // String-based heuristics for errors from init or config loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("gpio") || lower.contains("spi") {
        return "What happened: Failed to open GPIO or SPI.\nLikely causes: Not running on a Pi, pins claimed by another process, or insufficient permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process may access /dev/gpiomem and /dev/spidev0.0.".to_string();
    }

    if lower.contains("toml") || (lower.contains("expected") && lower.contains("line")) {
        return format!(
            "What happened: The config file did not parse.\nLikely causes: TOML syntax error or a misspelled key.\nHow to fix: Fix the file and rerun. Original: {msg}"
        );
    }

    if lower.contains("must be") {
        return format!(
            "What happened: Configuration is out of range ({msg}).\nHow to fix: Edit the named value in the TOML and rerun."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes by error class; generic errors return 1.
///
/// 2 is left to clap's usage errors.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(pe) = err.downcast_ref::<PumpError>() {
        return match pe {
            PumpError::Hardware(_) => 3,
            PumpError::HardwareFault(_) => 4,
            PumpError::Config(_) => 5,
            PumpError::State(_) => 6,
            PumpError::Calibration(_) => 7,
        };
    }
    1
}

fn error_class(err: &eyre::Report) -> &'static str {
    match err.downcast_ref::<PumpError>() {
        Some(PumpError::Hardware(_)) => "Hardware",
        Some(PumpError::HardwareFault(_)) => "HardwareFault",
        Some(PumpError::Config(_)) => "Config",
        Some(PumpError::State(_)) => "State",
        Some(PumpError::Calibration(_)) => "Calibration",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": error_class(err),
        "message": humanize(err),
    })
    .to_string()
}
