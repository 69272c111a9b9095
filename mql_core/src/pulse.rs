//! Step-pulse generation: timer planning, enable gating, pulse pacing.
//!
//! Frequency planning follows the 16-bit hardware timer the pump head runs
//! on: a 16 MHz reference clock behind a fixed divider ladder. For a target
//! frequency the planner picks the smallest divider whose reload value
//! `(clock / divider / hz) - 1` fits 16 bits, which maximizes timer
//! resolution; the achieved frequency is within one timer count of the
//! request. On a hosted target the [`PulsePacer`] thread turns the selected
//! divider and reload into wall-clock sleeps.
//!
//! Enable semantics: the enabled flag gates every pulse at emission time, so
//! clearing it suppresses output immediately; the ENA line follows with the
//! configured polarity (DM556-style drivers enable on low).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use mql_traits::clock::Clock;
use mql_traits::{EnableLine, StepPulse};

use crate::error::Result;
use crate::hw_error::map_hw_error;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Reference clock the timer model is planned against.
pub const TIMER_CLOCK_HZ: u32 = 16_000_000;
/// Divider ladder, fastest first.
pub const TIMER_DIVIDERS: [u32; 5] = [1, 8, 64, 256, 1024];
/// Lowest usable step frequency.
pub const MIN_STEP_HZ: u32 = 1;
/// Highest usable step frequency.
pub const MAX_STEP_HZ: u32 = 2000;

/// A planned divider/reload pair for the 16-bit timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSelection {
    pub divider: u32,
    pub reload: u16,
}

impl TimerSelection {
    /// Frequency actually produced by this selection.
    #[inline]
    pub fn actual_hz(&self) -> u32 {
        TIMER_CLOCK_HZ / (self.divider * (u32::from(self.reload) + 1))
    }

    /// Pulse period in microseconds, for wall-clock pacing.
    #[inline]
    pub fn period_us(&self) -> u64 {
        u64::from(self.divider) * (u64::from(self.reload) + 1) * MICROS_PER_SEC
            / u64::from(TIMER_CLOCK_HZ)
    }
}

/// Choose the smallest divider whose reload fits 16 bits for `hz`.
///
/// The input is clamped to `[MIN_STEP_HZ, MAX_STEP_HZ]` first; within that
/// range the ladder always yields a fit, but the slowest divider with a
/// saturated reload is kept as a total fallback.
pub fn select_timer(hz: u32) -> TimerSelection {
    let hz = hz.clamp(MIN_STEP_HZ, MAX_STEP_HZ);
    for divider in TIMER_DIVIDERS {
        let counts = (TIMER_CLOCK_HZ / divider / hz).max(1);
        let reload = counts - 1;
        if reload <= u32::from(u16::MAX) {
            return TimerSelection {
                divider,
                reload: reload as u16,
            };
        }
    }
    TimerSelection {
        divider: TIMER_DIVIDERS[TIMER_DIVIDERS.len() - 1],
        reload: u16::MAX,
    }
}

/// State shared between the control loop and the pulse-emitting context.
///
/// Exactly the fields the timer interrupt would read on the pump head:
/// the enable flag and the period. Plus two counters for observability.
#[derive(Debug)]
pub struct PulseShared {
    enabled: AtomicBool,
    period_us: AtomicU64,
    emitted: AtomicU64,
    faults: AtomicU64,
}

impl PulseShared {
    fn new(period_us: u64) -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(false),
            period_us: AtomicU64::new(period_us),
            emitted: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn period_us(&self) -> u64 {
        self.period_us.load(Ordering::Relaxed)
    }

    /// Pulses emitted since startup.
    #[inline]
    pub fn pulses_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Failed pulse attempts since startup.
    #[inline]
    pub fn pulse_faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Emit one pulse on `drive` if (and only if) the flag is still set.
    ///
    /// This is the timer-expiry body: constant work, checked against the
    /// flag at the last possible moment so a disable never lets a queued
    /// pulse through.
    pub fn emit_if_enabled<P: StepPulse>(&self, drive: &mut P) -> Result<bool> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(false);
        }
        drive
            .step_pulse()
            .map_err(|e| crate::error::Report::new(map_hw_error(&*e)))
            .wrap_err("step pulse")?;
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }
}

/// Owns the ENA line and the timer plan; the control-loop half of §"pulse
/// generation". The emitting half is whoever holds the [`PulseShared`]
/// handle, normally a [`PulsePacer`].
pub struct StepPulseGenerator<E: EnableLine> {
    ena: E,
    ena_active_high: bool,
    hz: u32,
    selection: TimerSelection,
    shared: Arc<PulseShared>,
}

impl<E: EnableLine> StepPulseGenerator<E> {
    /// `ena_active_low` matches the driver wiring; the default pump head
    /// uses inverted ENA (low = enabled).
    pub fn new(ena: E, ena_active_low: bool) -> Self {
        let selection = select_timer(MIN_STEP_HZ);
        Self {
            ena,
            ena_active_high: !ena_active_low,
            hz: MIN_STEP_HZ,
            selection,
            shared: PulseShared::new(selection.period_us()),
        }
    }

    /// Force the driver into the disabled state. Call once at startup so the
    /// physical line agrees with the flag.
    pub fn begin(&mut self) -> Result<()> {
        self.apply_ena(false)
    }

    /// Plan the timer for `hz` (clamped to the usable band) and publish the
    /// new period. Takes effect within one pulse period. Returns the
    /// frequency actually achieved.
    pub fn set_rate_hz(&mut self, hz: u32) -> u32 {
        let clamped = hz.clamp(MIN_STEP_HZ, MAX_STEP_HZ);
        if clamped != hz {
            tracing::trace!(requested = hz, clamped, "step rate clamped");
        }
        self.hz = clamped;
        self.selection = select_timer(clamped);
        self.shared
            .period_us
            .store(self.selection.period_us(), Ordering::Relaxed);
        self.selection.actual_hz()
    }

    /// Gate pulse output and drive the ENA line.
    ///
    /// The flag is written first: on disable, emission stops before the
    /// line even changes; on enable, the first pulse may race the line by
    /// at most one period, which the driver tolerates.
    pub fn set_enabled(&mut self, on: bool) -> Result<()> {
        self.shared.enabled.store(on, Ordering::Relaxed);
        self.apply_ena(on)
    }

    fn apply_ena(&mut self, on: bool) -> Result<()> {
        let high = on == self.ena_active_high;
        self.ena
            .set_level(high)
            .map_err(|e| crate::error::Report::new(map_hw_error(&*e)))
            .wrap_err("ena line")
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    #[inline]
    pub fn rate_hz(&self) -> u32 {
        self.hz
    }

    #[inline]
    pub fn selection(&self) -> TimerSelection {
        self.selection
    }

    #[inline]
    pub fn pulses_emitted(&self) -> u64 {
        self.shared.pulses_emitted()
    }

    /// Handle for the emitting context.
    pub fn shared(&self) -> Arc<PulseShared> {
        self.shared.clone()
    }
}

/// Background pulse emitter (the hosted stand-in for the timer interrupt).
///
/// Owns the STEP line. Each cycle sleeps one published period, re-checks the
/// enable flag and emits. While disabled it parks on a short idle poll.
/// Exactly one thread is spawned and joined on drop.
pub struct PulsePacer {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

/// Idle poll period while the pump is disabled.
const PACER_IDLE: Duration = Duration::from_millis(1);

impl PulsePacer {
    pub fn spawn<P, C>(shared: Arc<PulseShared>, mut drive: P, clock: C) -> Self
    where
        P: StepPulse + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("pulse pacer received shutdown signal");
                    break;
                }
                if !shared.is_enabled() {
                    clock.sleep(PACER_IDLE);
                    continue;
                }
                clock.sleep(Duration::from_micros(shared.period_us()));
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = shared.emit_if_enabled(&mut drive) {
                    shared.faults.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "step pulse failed");
                }
            }
            tracing::trace!("pulse pacer exiting cleanly");
        });

        Self {
            shutdown,
            join_handle: Some(join_handle),
        }
    }
}

impl Drop for PulsePacer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("pulse pacer joined successfully"),
                Err(e) => tracing::warn!(?e, "pulse pacer panicked during shutdown"),
            }
        }
    }
}
