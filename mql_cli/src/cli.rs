//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "mql", version, about = "MQL dosing pump controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/mql.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); wins over the
    /// config's `logging.level`, default info
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        #[cfg(target_os = "linux")]
        {
            return RtLock::Current;
        }
        #[cfg(target_os = "macos")]
        {
            return RtLock::None;
        }
        #[allow(unreachable_code)]
        RtLock::None
    }
}

/// Material selector mirrored from the config schema.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum MaterialArg {
    Steel,
    Aluminum,
}

impl From<MaterialArg> for mql_core::Material {
    fn from(m: MaterialArg) -> Self {
        match m {
            MaterialArg::Steel => mql_core::Material::Steel,
            MaterialArg::Aluminum => mql_core::Material::Aluminum,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dosing controller against the configured backends
    Run {
        /// Stop after this many milliseconds instead of running until ctrl-c
        #[arg(long, value_name = "MS")]
        duration_ms: Option<u64>,
        /// Begin dosing immediately instead of waiting for the start button
        #[arg(long, action = ArgAction::SetTrue)]
        autostart: bool,
        /// Enable real-time mode (SCHED_FIFO + mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on supported OSes.\n\nLinux: attempts SCHED_FIFO priority and calls mlockall to keep the pulse pacer's pages resident. May require elevated privileges or a raised memlock ulimit.\n\nmacOS: only mlockall is applied; SCHED_FIFO is unavailable."
        )]
        rt: bool,
        /// SCHED_FIFO priority when --rt is set (Linux only, clamped to the system range)
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Memory locking mode for --rt: none, current, or all
        #[arg(long, value_enum, value_name = "MODE")]
        rt_lock: Option<RtLock>,
        /// Print pulse and input counters on exit
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
    },
    /// Timed reference run for calibration, or apply a measured volume
    Calibrate {
        /// Reference run length in seconds (60 or 120)
        #[arg(long, value_name = "SECS", default_value_t = 60)]
        secs: u32,
        /// Measured volume in ml. When given, the factor is computed and
        /// stored without running the pump.
        #[arg(long, value_name = "ML")]
        ml: Option<f64>,
    },
    /// Print the recommended flow for a material and cutter diameter
    Recommend {
        /// Workpiece material
        #[arg(long, value_enum, default_value_t = MaterialArg::Steel)]
        material: MaterialArg,
        /// Cutter diameter in millimeters
        #[arg(long, value_name = "MM")]
        cutter_mm: u8,
    },
    /// Exercise the decode, planning and pulse paths against the sim backends
    SelfCheck,
}
