//! Quadrature encoder and button decoding.
//!
//! The decoder walks a 4x4 Gray-code transition table: each (A, B) pair forms
//! a 2-bit phase state, and `table[(prev << 2) | current]` yields -1, 0 or +1
//! per signal edge. Invalid transitions (both lines appearing to change at
//! once) contribute zero. Edges accumulate into a signed counter and one
//! detent is emitted per `detent_edges` accepted edges, keeping leftovers so
//! nothing is lost between polls.
//!
//! Two guards tame mechanical reality:
//! - a minimum inter-edge time (microseconds) drops switch bounce outright;
//! - a minimum inter-step time (milliseconds) rate-limits emitted detents.
//!
//! Two backends satisfy the same contract behind [`EncoderInput`]:
//! [`PolledEncoder`] samples the lines from the input loop, while
//! [`IsrEncoder`] drains a [`DetentAccumulator`] fed from an edge-interrupt
//! callback. For the same physical rotation both produce the same detent
//! count.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use mql_traits::EncoderPins;
use mql_traits::clock::Clock;

use crate::config::EncoderTuning;

/// One poll's worth of decoded operator input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderEvent {
    /// Whole detents emitted this poll: -1, 0 or +1.
    pub step: i8,
    /// Debounced short press released before the long-press threshold.
    pub click: bool,
    /// One-shot long press; fires once per physical hold.
    pub hold: bool,
}

impl EncoderEvent {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.step == 0 && !self.click && !self.hold
    }
}

/// Decode backends unify here; the control loop neither knows nor cares
/// whether edges arrive by interrupt or by polling.
pub trait EncoderInput {
    fn poll(&mut self) -> EncoderEvent;
}

/// Per-edge direction for `(prev << 2) | current` phase state pairs.
/// Phase state is `(A << 1) | B`.
const QUAD_STEP: [i8; 16] = [
    0, -1, 1, 0, //
    1, 0, 0, -1, //
    -1, 0, 0, 1, //
    0, 1, -1, 0,
];

/// Sentinel for "no phase state observed yet".
const PHASE_UNSET: u8 = 0xFF;

#[inline]
fn phase_state(a: bool, b: bool) -> u8 {
    (u8::from(a) << 1) | u8::from(b)
}

#[inline]
fn edge_direction(prev: u8, cur: u8) -> i8 {
    QUAD_STEP[usize::from((prev << 2) | cur)]
}

/// Lock-free edge accumulator shared between an interrupt context and the
/// input loop.
///
/// `on_edge` is constant-time (a table lookup plus a few atomic updates) and
/// safe to call from an interrupt or GPIO-callback context; there must be
/// exactly one such producer. `take_detents` atomically extracts whole
/// detents and leaves partial edges in place, so a reader always observes a
/// pre- or post-update count, never a torn one.
#[derive(Debug)]
pub struct DetentAccumulator {
    detent_edges: i32,
    sign: i32,
    min_edge_us: u64,
    phase: AtomicU8,
    last_edge_us: AtomicU64,
    edges: AtomicI32,
}

impl DetentAccumulator {
    pub fn new(tuning: &EncoderTuning) -> Arc<Self> {
        Arc::new(Self {
            detent_edges: i32::from(tuning.detent_edges.max(1)),
            sign: if tuning.invert { -1 } else { 1 },
            min_edge_us: u64::from(tuning.min_edge_us),
            phase: AtomicU8::new(PHASE_UNSET),
            last_edge_us: AtomicU64::new(0),
            edges: AtomicI32::new(0),
        })
    }

    /// Feed one observed (A, B) level pair with a monotonic timestamp.
    ///
    /// The first call only seeds the phase state. Edges faster than the
    /// bounce guard still advance the phase (it tracks the physical lines)
    /// but are not counted.
    pub fn on_edge(&self, a: bool, b: bool, now_us: u64) {
        let cur = phase_state(a, b);
        let prev = self.phase.swap(cur, Ordering::Relaxed);
        if prev == PHASE_UNSET || prev == cur {
            return;
        }
        let dir = edge_direction(prev, cur);
        if dir == 0 {
            return;
        }
        let last = self.last_edge_us.load(Ordering::Relaxed);
        if now_us.saturating_sub(last) < self.min_edge_us && last != 0 {
            return;
        }
        self.last_edge_us.store(now_us, Ordering::Relaxed);
        self.edges.fetch_add(i32::from(dir) * self.sign, Ordering::Relaxed);
    }

    /// Atomically drain whole detents, preserving leftover edges for the
    /// next call. Returns a signed detent count.
    pub fn take_detents(&self) -> i32 {
        loop {
            let cur = self.edges.load(Ordering::Relaxed);
            let detents = cur / self.detent_edges;
            if detents == 0 {
                return 0;
            }
            let rest = cur - detents * self.detent_edges;
            if self
                .edges
                .compare_exchange(cur, rest, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return detents;
            }
        }
    }

    /// Edges currently accumulated below one detent (plus any not yet taken).
    pub fn pending_edges(&self) -> i32 {
        self.edges.load(Ordering::Relaxed)
    }
}

/// Level-debounced button with click/hold discrimination.
///
/// A raw level change restarts the debounce window; only a level stable for
/// the full window becomes the debounced state. Releasing before the
/// long-press threshold yields a click; crossing the threshold while held
/// yields exactly one hold and suppresses the click on release.
#[derive(Debug)]
pub struct ButtonDecoder {
    debounce_ms: u64,
    long_ms: u64,
    raw_last: bool,
    raw_changed_ms: u64,
    stable: bool,
    pressed_at_ms: u64,
    hold_fired: bool,
}

impl ButtonDecoder {
    pub fn new(tuning: &EncoderTuning) -> Self {
        Self {
            debounce_ms: u64::from(tuning.btn_debounce_ms),
            long_ms: u64::from(tuning.btn_long_ms),
            raw_last: false,
            raw_changed_ms: 0,
            stable: false,
            pressed_at_ms: 0,
            hold_fired: false,
        }
    }

    /// Advance the state machine with the current raw level.
    /// Returns `(click, hold)`, each a one-shot.
    pub fn update(&mut self, pressed: bool, now_ms: u64) -> (bool, bool) {
        if pressed != self.raw_last {
            self.raw_last = pressed;
            self.raw_changed_ms = now_ms;
        }

        let mut click = false;
        let mut hold = false;

        if self.raw_last != self.stable
            && now_ms.saturating_sub(self.raw_changed_ms) >= self.debounce_ms
        {
            self.stable = self.raw_last;
            if self.stable {
                self.pressed_at_ms = self.raw_changed_ms;
                self.hold_fired = false;
            } else if !self.hold_fired {
                click = true;
            }
        }

        if self.stable
            && !self.hold_fired
            && now_ms.saturating_sub(self.pressed_at_ms) >= self.long_ms
        {
            self.hold_fired = true;
            hold = true;
        }

        (click, hold)
    }
}

/// Emit at most one detent from `pending`, honoring the inter-step guard.
#[inline]
fn emit_step(pending: &mut i32, last_step_ms: &mut u64, now_ms: u64, guard_ms: u64) -> i8 {
    if *pending == 0 || now_ms.saturating_sub(*last_step_ms) < guard_ms {
        return 0;
    }
    let step = pending.signum();
    *pending -= step;
    *last_step_ms = now_ms;
    step as i8
}

/// Poll-driven backend: samples both lines each call and runs the same
/// transition table as the interrupt path.
pub struct PolledEncoder<P: EncoderPins, C: Clock> {
    pins: P,
    clock: C,
    epoch: Instant,
    detent_edges: i32,
    sign: i32,
    min_edge_us: u64,
    step_guard_ms: u64,
    phase: u8,
    last_edge_us: u64,
    edges: i32,
    pending: i32,
    last_step_ms: u64,
    button: ButtonDecoder,
}

impl<P: EncoderPins, C: Clock> PolledEncoder<P, C> {
    pub fn new(pins: P, tuning: &EncoderTuning, clock: C) -> Self {
        let epoch = clock.now();
        Self {
            pins,
            clock,
            epoch,
            detent_edges: i32::from(tuning.detent_edges.max(1)),
            sign: if tuning.invert { -1 } else { 1 },
            min_edge_us: u64::from(tuning.min_edge_us),
            step_guard_ms: u64::from(tuning.step_guard_ms),
            phase: PHASE_UNSET,
            last_edge_us: 0,
            edges: 0,
            pending: 0,
            last_step_ms: 0,
            button: ButtonDecoder::new(tuning),
        }
    }

    fn feed(&mut self, a: bool, b: bool, now_us: u64) {
        let cur = phase_state(a, b);
        let prev = self.phase;
        self.phase = cur;
        if prev == PHASE_UNSET || prev == cur {
            return;
        }
        let dir = edge_direction(prev, cur);
        if dir == 0 {
            return;
        }
        if now_us.saturating_sub(self.last_edge_us) < self.min_edge_us && self.last_edge_us != 0 {
            return;
        }
        self.last_edge_us = now_us;
        self.edges += i32::from(dir) * self.sign;
    }
}

impl<P: EncoderPins, C: Clock> EncoderInput for PolledEncoder<P, C> {
    fn poll(&mut self) -> EncoderEvent {
        let now_us = self.clock.us_since(self.epoch);
        let now_ms = now_us / 1000;

        let (a, b) = self.pins.phases();
        self.feed(a, b, now_us);

        let detents = self.edges / self.detent_edges;
        if detents != 0 {
            self.edges -= detents * self.detent_edges;
            self.pending += detents;
        }

        let step = emit_step(&mut self.pending, &mut self.last_step_ms, now_ms, self.step_guard_ms);
        let (click, hold) = self.button.update(self.pins.button_pressed(), now_ms);

        EncoderEvent { step, click, hold }
    }
}

/// Interrupt-driven backend: the quadrature half lives in a shared
/// [`DetentAccumulator`] fed by an edge callback; only the button is still
/// polled here.
pub struct IsrEncoder<P: EncoderPins, C: Clock> {
    acc: Arc<DetentAccumulator>,
    pins: P,
    clock: C,
    epoch: Instant,
    step_guard_ms: u64,
    pending: i32,
    last_step_ms: u64,
    button: ButtonDecoder,
}

impl<P: EncoderPins, C: Clock> IsrEncoder<P, C> {
    pub fn new(acc: Arc<DetentAccumulator>, pins: P, tuning: &EncoderTuning, clock: C) -> Self {
        let epoch = clock.now();
        Self {
            acc,
            pins,
            clock,
            epoch,
            step_guard_ms: u64::from(tuning.step_guard_ms),
            pending: 0,
            last_step_ms: 0,
            button: ButtonDecoder::new(tuning),
        }
    }

    /// Shared accumulator handle for wiring up the edge callback.
    pub fn accumulator(&self) -> Arc<DetentAccumulator> {
        self.acc.clone()
    }
}

impl<P: EncoderPins, C: Clock> EncoderInput for IsrEncoder<P, C> {
    fn poll(&mut self) -> EncoderEvent {
        let now_ms = self.clock.ms_since(self.epoch);

        self.pending += self.acc.take_detents();
        let step = emit_step(&mut self.pending, &mut self.last_step_ms, now_ms, self.step_guard_ms);
        let (click, hold) = self.button.update(self.pins.button_pressed(), now_ms);

        EncoderEvent { step, click, hold }
    }
}
