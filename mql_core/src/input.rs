//! Background operator-input sampling.
//!
//! Spawns a thread that owns the encoder backend, the start button and the
//! pot, polls them at the configured input period, and forwards combined
//! samples over a bounded channel. When the channel is full the sample is
//! folded into the next one instead of being dropped, so detents and
//! clicks survive a stalled consumer.
//!
//! Safety: each `InputSampler` spawns exactly one thread that is shut down
//! when the `InputSampler` is dropped, preventing thread leaks.
use crossbeam_channel as xch;
use mql_traits::clock::Clock;
use mql_traits::{PotInput, StartInput};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::encoder::{EncoderEvent, EncoderInput};

/// One poll's worth of operator input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSample {
    pub event: EncoderEvent,
    /// Start/stop press edge (one-shot per press).
    pub start: bool,
    /// Raw pot reading, when the read succeeded this poll.
    pub pot_raw: Option<u16>,
}

impl InputSample {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.event.is_empty() && !self.start && self.pot_raw.is_none()
    }

    /// Fold a newer sample into this one. Steps accumulate, button edges
    /// stick, the newest pot reading wins.
    pub fn fold(&mut self, newer: InputSample) {
        self.event.step = self.event.step.saturating_add(newer.event.step);
        self.event.click |= newer.event.click;
        self.event.hold |= newer.event.hold;
        self.start |= newer.start;
        if newer.pot_raw.is_some() {
            self.pot_raw = newer.pot_raw;
        }
    }
}

pub struct InputSampler {
    rx: xch::Receiver<InputSample>,
    coalesced: Arc<AtomicU64>,
    pot_errors: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl InputSampler {
    pub fn spawn<E, B, P, C>(mut encoder: E, mut start: B, mut pot: P, poll_ms: u32, clock: C) -> Self
    where
        E: EncoderInput + Send + 'static,
        B: StartInput + Send + 'static,
        P: PotInput + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(64);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let coalesced = Arc::new(AtomicU64::new(0));
        let coalesced_clone = coalesced.clone();
        let pot_errors = Arc::new(AtomicU64::new(0));
        let pot_errors_clone = pot_errors.clone();
        let period = Duration::from_millis(u64::from(poll_ms.max(1)));

        let join_handle = std::thread::spawn(move || {
            let mut start_was_pressed = false;
            let mut carry: Option<InputSample> = None;
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("input sampler received shutdown signal");
                    break;
                }

                let mut sample = carry.take().unwrap_or_default();
                sample.fold(InputSample {
                    event: encoder.poll(),
                    start: false,
                    pot_raw: None,
                });

                let pressed = start.pressed();
                if pressed && !start_was_pressed {
                    sample.start = true;
                }
                start_was_pressed = pressed;

                match pot.read() {
                    Ok(raw) => sample.pot_raw = Some(raw),
                    Err(e) => {
                        pot_errors_clone.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(error = %e, "pot read failed");
                    }
                }

                match tx.try_send(sample) {
                    Ok(()) => {}
                    Err(xch::TrySendError::Full(s)) => {
                        // Consumer is behind; keep the events for next time.
                        coalesced_clone.fetch_add(1, Ordering::Relaxed);
                        carry = Some(s);
                    }
                    Err(xch::TrySendError::Disconnected(_)) => {
                        tracing::debug!("input consumer disconnected, exiting thread");
                        break;
                    }
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                clock.sleep(period);
            }
            tracing::trace!("input sampler thread exiting cleanly");
        });

        Self {
            rx,
            coalesced,
            pot_errors,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Merge everything queued since the last drain into one sample.
    pub fn drain(&self) -> InputSample {
        let mut merged = InputSample::default();
        for s in self.rx.try_iter() {
            merged.fold(s);
        }
        merged
    }

    /// How often a full channel forced a sample to be carried over.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn pot_errors(&self) -> u64 {
        self.pot_errors.load(Ordering::Relaxed)
    }
}

impl Drop for InputSampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("input sampler thread joined");
                }
                Err(e) => {
                    // Cannot propagate a panic out of Drop.
                    tracing::warn!(?e, "input sampler thread panicked during shutdown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_accumulates_steps_and_keeps_edges() {
        let mut a = InputSample {
            event: EncoderEvent { step: 1, click: false, hold: false },
            start: false,
            pot_raw: Some(100),
        };
        a.fold(InputSample {
            event: EncoderEvent { step: 1, click: true, hold: false },
            start: true,
            pot_raw: None,
        });
        a.fold(InputSample {
            event: EncoderEvent { step: -1, click: false, hold: false },
            start: false,
            pot_raw: Some(900),
        });
        assert_eq!(a.event.step, 1);
        assert!(a.event.click);
        assert!(a.start);
        assert_eq!(a.pot_raw, Some(900));
    }

    #[test]
    fn empty_sample_reports_empty() {
        assert!(InputSample::default().is_empty());
        let s = InputSample { pot_raw: Some(1), ..Default::default() };
        assert!(!s.is_empty());
    }
}
