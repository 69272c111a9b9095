//! `mql` binary: argument parsing, logging setup and command dispatch.
//!
//! Commands run against the GPIO/SPI rig when built with the `hardware`
//! feature on Linux, and against the simulation backends everywhere else.
//! Summaries go to stdout (one JSON line with `--json`); logs go to stderr
//! and optionally to a JSON-lines file per the `[logging]` config section.

mod cli;
mod error_fmt;
mod rt;
mod run;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use mql_core::{PumpError, Result};

use crate::cli::{Cli, Commands, JSON_MODE, MaterialArg, RtLock};

fn main() {
    let code = match real_main() {
        Ok(()) => 0,
        Err(err) => {
            if json_mode() {
                println!("{}", error_fmt::format_error_json(&err));
            } else {
                eprintln!("{}", error_fmt::humanize(&err));
            }
            error_fmt::exit_code_for_error(&err)
        }
    };
    std::process::exit(code);
}

fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

fn real_main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let file_cfg = run::load_config(&cli.config)?;
    init_tracing(&cli, &file_cfg.logging)?;
    tracing::info!(
        path = %cli.config.display(),
        found = cli.config.exists(),
        "config loaded"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .wrap_err("install ctrl-c handler")?;
    }

    match cli.cmd {
        Commands::Run {
            duration_ms,
            autostart,
            rt,
            rt_prio,
            rt_lock,
            stats,
        } => {
            rt::setup_rt_once(rt, rt_prio, rt_lock.unwrap_or(RtLock::os_default()));
            let args = run::RunArgs {
                duration_ms,
                autostart,
                stats,
            };
            let mut file_cfg = file_cfg;
            let summary;
            #[cfg(all(feature = "hardware", target_os = "linux"))]
            {
                // rig.isr stays behind in `rig`, keeping the quadrature
                // interrupts attached until the loop returns.
                let rig = run::hardware_rig(&file_cfg)?;
                summary = run::run_loop(
                    &cli.config,
                    &mut file_cfg,
                    &args,
                    rig.encoder,
                    rig.start,
                    rig.pot,
                    rig.drive,
                    rig.ena,
                    shutdown,
                )?;
            }
            #[cfg(not(all(feature = "hardware", target_os = "linux")))]
            {
                let (encoder, start, pot, drive, ena) = run::sim_rig(&file_cfg);
                summary = run::run_loop(
                    &cli.config,
                    &mut file_cfg,
                    &args,
                    encoder,
                    start,
                    pot,
                    drive,
                    ena,
                    shutdown,
                )?;
            }
            print_run_summary(&summary);
            Ok(())
        }
        Commands::Calibrate { secs, ml } => {
            if let Some(ml) = ml {
                let factor = run::apply_measured_volume(&cli.config, file_cfg, secs, ml)?;
                print_cal_stored(secs, ml, factor);
                return Ok(());
            }
            let summary;
            #[cfg(all(feature = "hardware", target_os = "linux"))]
            {
                let rig = run::hardware_rig(&file_cfg)?;
                summary = run::run_cal_dispense(
                    &file_cfg,
                    secs,
                    rig.encoder,
                    rig.start,
                    rig.pot,
                    rig.drive,
                    rig.ena,
                    shutdown,
                )?;
            }
            #[cfg(not(all(feature = "hardware", target_os = "linux")))]
            {
                let (encoder, start, pot, drive, ena) = run::sim_rig(&file_cfg);
                summary = run::run_cal_dispense(
                    &file_cfg, secs, encoder, start, pot, drive, ena, shutdown,
                )?;
            }
            print_cal_dispensed(&summary);
            Ok(())
        }
        Commands::Recommend {
            material,
            cutter_mm,
        } => {
            if !(1..=60).contains(&cutter_mm) {
                return Err(PumpError::Config(format!(
                    "cutter_mm must be in [1, 60], got {cutter_mm}"
                ))
                .into());
            }
            let rec = mql_core::flow::recommended_flow_x100(
                material.into(),
                cutter_mm,
                file_cfg.flow.al_factor_x100,
            );
            print_recommendation(material, cutter_mm, rec);
            Ok(())
        }
        Commands::SelfCheck => {
            run::self_check(&file_cfg)?;
            println!("self-check passed");
            Ok(())
        }
    }
}

/// Console logs always go to stderr so stdout stays parseable; the
/// optional file sink is JSON lines with the configured rotation.
fn init_tracing(cli: &Cli, logging: &mql_config::Logging) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = cli
        .log_level
        .clone()
        .or_else(|| logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_layer = match &logging.file {
        Some(path) => {
            let p = std::path::Path::new(path);
            let dir = match p.parent() {
                Some(d) if !d.as_os_str().is_empty() => d,
                _ => std::path::Path::new("."),
            };
            let name = p
                .file_name()
                .map(std::ffi::OsStr::to_os_string)
                .unwrap_or_else(|| "mql.log".into());
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = cli::FILE_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if cli.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .wrap_err("tracing init")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .wrap_err("tracing init")?;
    }
    Ok(())
}

fn unix_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn profile_name() -> &'static str {
    if cfg!(all(feature = "hardware", target_os = "linux")) {
        "hardware"
    } else {
        "sim"
    }
}

fn print_run_summary(s: &run::RunSummary) {
    if json_mode() {
        let line = serde_json::json!({
            "timestamp": unix_ts(),
            "profile": profile_name(),
            "duration_ms": s.duration_ms,
            "target_x100": s.target_x100,
            "rate_hz": s.rate_hz,
            "pulses": s.pulses,
            "pulse_faults": s.pulse_faults,
            "pot_errors": s.pot_errors,
            "coalesced": s.coalesced,
            "run_state": format!("{:?}", s.run_state),
            "calibrated": s.calibrated,
            "stopped_by": s.stopped_by,
        });
        println!("{line}");
    } else {
        println!(
            "run complete: state {:?}, target {}.{:02} u/min, {} pulses in {} ms (stopped by {})",
            s.run_state,
            s.target_x100 / 100,
            s.target_x100.rem_euclid(100),
            s.pulses,
            s.duration_ms,
            s.stopped_by
        );
    }
}

fn print_cal_dispensed(s: &run::CalSummary) {
    if json_mode() {
        let line = serde_json::json!({
            "timestamp": unix_ts(),
            "profile": profile_name(),
            "secs": s.secs,
            "duration_ms": s.duration_ms,
            "pulses": s.pulses,
            "aborted": s.aborted,
        });
        println!("{line}");
        return;
    }
    if s.aborted {
        println!("calibration dispense aborted after {} ms", s.duration_ms);
        return;
    }
    println!(
        "calibration dispense complete: {} pulses over {} s",
        s.pulses, s.secs
    );
    println!(
        "measure the collected volume, then store it with: mql calibrate --secs {} --ml <ML>",
        s.secs
    );
}

fn print_cal_stored(secs: u32, ml: f64, factor_x1000: u32) {
    if json_mode() {
        let line = serde_json::json!({
            "timestamp": unix_ts(),
            "secs": secs,
            "ml": ml,
            "ml_per_u_x1000": factor_x1000,
            "calibrated": true,
        });
        println!("{line}");
    } else {
        println!(
            "calibration stored: {:.3} ml per flow unit (from {ml} ml over {secs} s)",
            f64::from(factor_x1000) / 1000.0
        );
    }
}

fn print_recommendation(material: MaterialArg, cutter_mm: u8, rec_x100: i32) {
    let material_name = match material {
        MaterialArg::Steel => "steel",
        MaterialArg::Aluminum => "aluminum",
    };
    if json_mode() {
        let line = serde_json::json!({
            "material": material_name,
            "cutter_mm": cutter_mm,
            "recommended_x100": rec_x100,
        });
        println!("{line}");
    } else {
        println!(
            "recommended flow for {material_name}, {cutter_mm} mm cutter: {}.{:02} u/min",
            rec_x100 / 100,
            rec_x100.rem_euclid(100)
        );
    }
}
