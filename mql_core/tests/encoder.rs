//! End-to-end decoding tests for both encoder backends.
//!
//! Drives scripted (A, B) levels through [`PolledEncoder`] and the same
//! edge stream through [`DetentAccumulator`]/[`IsrEncoder`] and asserts:
//! - one full Gray-code cycle is exactly one detent, signed by direction
//! - fast rotation is metered by the step guard but never loses detents
//! - contact bounce inside the edge guard is dropped
//! - both backends agree on the same physical motion

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mql_core::config::EncoderTuning;
use mql_core::encoder::{DetentAccumulator, EncoderInput, IsrEncoder, PolledEncoder};
use mql_traits::EncoderPins;
use mql_traits::clock::Clock;

// Deterministic test clock with microsecond resolution; the edge guard
// works below one millisecond.
#[derive(Clone)]
struct TestClock {
    origin: Instant,
    us: Arc<AtomicU64>,
}
impl TestClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            us: Arc::new(AtomicU64::new(0)),
        }
    }
    fn advance_us(&self, us: u64) {
        self.us.fetch_add(us, Ordering::Relaxed);
    }
    fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }
}
impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_micros(self.us.load(Ordering::Relaxed))
    }
    fn sleep(&self, d: Duration) {
        let add = d.as_micros() as u64;
        if add > 0 {
            self.advance_us(add);
        }
    }
}

// Pin levels the test mutates while the decoder holds the other handle.
#[derive(Default)]
struct PinState {
    a: bool,
    b: bool,
    button: bool,
}

#[derive(Clone, Default)]
struct SharedPins(Arc<Mutex<PinState>>);

impl SharedPins {
    fn set(&self, a: bool, b: bool) {
        let mut s = self.0.lock().unwrap();
        s.a = a;
        s.b = b;
    }
    fn set_button(&self, pressed: bool) {
        self.0.lock().unwrap().button = pressed;
    }
}

impl EncoderPins for SharedPins {
    fn phases(&mut self) -> (bool, bool) {
        let s = self.0.lock().unwrap();
        (s.a, s.b)
    }
    fn button_pressed(&mut self) -> bool {
        self.0.lock().unwrap().button
    }
}

// One detent clockwise from rest: phase states 00 -> 10 -> 11 -> 01 -> 00.
const CW_CYCLE: [(bool, bool); 4] = [(true, false), (true, true), (false, true), (false, false)];
const CCW_CYCLE: [(bool, bool); 4] = [(false, true), (true, true), (true, false), (false, false)];

fn rig() -> (PolledEncoder<SharedPins, TestClock>, SharedPins, TestClock) {
    let pins = SharedPins::default();
    let clk = TestClock::new();
    let enc = PolledEncoder::new(pins.clone(), &EncoderTuning::default(), clk.clone());
    (enc, pins, clk)
}

/// Walk one edge: update the lines, advance time, poll once.
fn walk(
    enc: &mut PolledEncoder<SharedPins, TestClock>,
    pins: &SharedPins,
    clk: &TestClock,
    (a, b): (bool, bool),
    gap_us: u64,
) -> i32 {
    pins.set(a, b);
    clk.advance_us(gap_us);
    i32::from(enc.poll().step)
}

#[test]
fn one_full_cycle_is_one_detent_each_way() {
    let (mut enc, pins, clk) = rig();
    assert!(enc.poll().is_empty(), "rest position produced an event");

    let mut steps = 0;
    for &st in &CW_CYCLE {
        steps += walk(&mut enc, &pins, &clk, st, 1_000);
    }
    clk.advance_ms(5);
    steps += i32::from(enc.poll().step);
    assert_eq!(steps, 1);

    let mut steps = 0;
    for &st in &CCW_CYCLE {
        steps += walk(&mut enc, &pins, &clk, st, 1_000);
    }
    clk.advance_ms(5);
    steps += i32::from(enc.poll().step);
    assert_eq!(steps, -1);
}

#[test]
fn fast_rotation_is_metered_but_never_lost() {
    let (mut enc, pins, clk) = rig();
    enc.poll();

    // Three detents at one edge per millisecond; the 2 ms step guard may
    // delay emissions past the rotation itself.
    let mut total = 0;
    for _ in 0..3 {
        for &st in &CW_CYCLE {
            let step = walk(&mut enc, &pins, &clk, st, 1_000);
            assert!(step.abs() <= 1, "more than one detent in a single poll");
            total += step;
        }
    }
    // Drain whatever the guard held back.
    for _ in 0..8 {
        clk.advance_ms(5);
        total += i32::from(enc.poll().step);
    }
    assert_eq!(total, 3);
}

#[test]
fn contact_bounce_is_rejected() {
    let (mut enc, pins, clk) = rig();
    enc.poll();

    // Clean first edge, then chatter well inside the 300 us guard. The
    // bounce-back edge would count -1 if it were accepted.
    assert_eq!(walk(&mut enc, &pins, &clk, (true, false), 1_000), 0);
    assert_eq!(walk(&mut enc, &pins, &clk, (false, false), 150), 0);
    assert_eq!(walk(&mut enc, &pins, &clk, (true, false), 120), 0);

    // Finish the detent cleanly; the chatter must have counted once, not
    // three times.
    let mut steps = 0;
    for &st in &[(true, true), (false, true), (false, false)] {
        steps += walk(&mut enc, &pins, &clk, st, 1_000);
    }
    clk.advance_ms(5);
    steps += i32::from(enc.poll().step);
    assert_eq!(steps, 1);
}

#[test]
fn isr_backend_matches_polled_for_the_same_motion() {
    // Two detents forward, one back.
    let mut motion: Vec<(bool, bool)> = Vec::new();
    motion.extend_from_slice(&CW_CYCLE);
    motion.extend_from_slice(&CW_CYCLE);
    motion.extend_from_slice(&CCW_CYCLE);

    let (mut polled, pins, clk) = rig();
    polled.poll();
    let mut polled_total = 0;
    for &st in &motion {
        polled_total += walk(&mut polled, &pins, &clk, st, 1_000);
    }
    for _ in 0..8 {
        clk.advance_ms(5);
        polled_total += i32::from(polled.poll().step);
    }

    let tuning = EncoderTuning::default();
    let acc = DetentAccumulator::new(&tuning);
    let mut t_us = 0u64;
    acc.on_edge(false, false, t_us); // seed at rest
    for &(a, b) in &motion {
        t_us += 1_000;
        acc.on_edge(a, b, t_us);
    }

    let isr_clk = TestClock::new();
    let mut isr = IsrEncoder::new(acc, SharedPins::default(), &tuning, isr_clk.clone());
    let mut isr_total = 0;
    for _ in 0..8 {
        isr_clk.advance_ms(5);
        isr_total += i32::from(isr.poll().step);
    }

    assert_eq!(polled_total, 1);
    assert_eq!(isr_total, polled_total);
}

#[test]
fn short_press_clicks_through_the_polled_backend() {
    let (mut enc, pins, clk) = rig();
    enc.poll();

    pins.set_button(true);
    clk.advance_ms(1);
    assert!(enc.poll().is_empty());
    clk.advance_ms(30); // past the 25 ms debounce
    let ev = enc.poll();
    assert!(!ev.click && !ev.hold);

    pins.set_button(false);
    clk.advance_ms(1);
    enc.poll();
    clk.advance_ms(30);
    let ev = enc.poll();
    assert!(ev.click, "debounced release did not click");
    assert!(!ev.hold);
    assert_eq!(ev.step, 0);
}

#[test]
fn long_press_holds_once_and_suppresses_the_click() {
    let (mut enc, pins, clk) = rig();
    enc.poll();

    pins.set_button(true);
    clk.advance_ms(1);
    enc.poll();
    clk.advance_ms(30);
    enc.poll();

    clk.advance_ms(700); // past the 600 ms long-press threshold
    let ev = enc.poll();
    assert!(ev.hold);
    clk.advance_ms(100);
    assert!(!enc.poll().hold, "hold fired twice for one press");

    pins.set_button(false);
    clk.advance_ms(1);
    enc.poll();
    clk.advance_ms(30);
    assert!(!enc.poll().click, "click after a hold");
}
