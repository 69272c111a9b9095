//! Input sampler thread lifecycle and delivery tests.
//!
//! Verifies that:
//! - the sampling thread is cleaned up when the InputSampler is dropped
//! - multiple samplers can be created and destroyed without accumulating
//!   threads
//! - scripted encoder events all arrive (nothing is dropped on the way)
//! - a held start button produces exactly one edge per press
//! - pot read failures are counted, not fatal

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mql_core::encoder::EncoderEvent;
use mql_core::input::{InputSample, InputSampler};
use mql_core::mocks::{FixedPot, IdleStart, ScriptedEncoder};
use mql_traits::clock::MonotonicClock;
use mql_traits::{PotInput, StartInput};

// Start button the test can press from outside the thread.
#[derive(Clone, Default)]
struct SharedStart(Arc<AtomicBool>);

impl StartInput for SharedStart {
    fn pressed(&mut self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// A pot whose wiring has failed.
struct BrokenPot;

impl PotInput for BrokenPot {
    fn read(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("adc read failed")))
    }
}

fn drain_until(
    sampler: &InputSampler,
    deadline: Duration,
    done: impl Fn(&InputSample) -> bool,
) -> InputSample {
    let mut merged = InputSample::default();
    let end = Instant::now() + deadline;
    while Instant::now() < end && !done(&merged) {
        thread::sleep(Duration::from_millis(5));
        merged.fold(sampler.drain());
    }
    merged
}

#[test]
fn input_thread_exits_on_drop() {
    let sampler = InputSampler::spawn(
        ScriptedEncoder::default(),
        IdleStart,
        FixedPot(512),
        1,
        MonotonicClock::new(),
    );
    thread::sleep(Duration::from_millis(50));
    drop(sampler);
    // Passes if drop completes without hanging on the join.
}

#[test]
fn multiple_samplers_dont_leak_threads() {
    for _ in 0..10 {
        let sampler = InputSampler::spawn(
            ScriptedEncoder::default(),
            IdleStart,
            FixedPot(0),
            1,
            MonotonicClock::new(),
        );
        thread::sleep(Duration::from_millis(10));
        let _ = sampler.drain();
        drop(sampler);
    }
}

#[test]
fn shutdown_is_prompt() {
    let sampler = InputSampler::spawn(
        ScriptedEncoder::default(),
        IdleStart,
        FixedPot(0),
        5,
        MonotonicClock::new(),
    );
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    drop(sampler);
    let shutdown_time = start.elapsed();
    assert!(
        shutdown_time < Duration::from_millis(200),
        "shutdown took {shutdown_time:?}, expected < 200ms"
    );
}

#[test]
fn scripted_events_all_arrive() {
    let mut script: Vec<EncoderEvent> = Vec::new();
    for _ in 0..5 {
        script.push(EncoderEvent {
            step: 1,
            ..Default::default()
        });
    }
    script.push(EncoderEvent {
        click: true,
        ..Default::default()
    });

    let sampler = InputSampler::spawn(
        ScriptedEncoder::new(script),
        IdleStart,
        FixedPot(700),
        1,
        MonotonicClock::new(),
    );

    let merged = drain_until(&sampler, Duration::from_secs(1), |m| {
        m.event.step >= 5 && m.event.click
    });
    assert_eq!(merged.event.step, 5, "detents were lost in transit");
    assert!(merged.event.click, "click was lost in transit");
    assert_eq!(merged.pot_raw, Some(700));
}

#[test]
fn a_held_start_button_edges_once() {
    let button = SharedStart::default();
    let sampler = InputSampler::spawn(
        ScriptedEncoder::default(),
        button.clone(),
        FixedPot(0),
        1,
        MonotonicClock::new(),
    );

    button.0.store(true, Ordering::Relaxed);
    let first = drain_until(&sampler, Duration::from_secs(1), |m| m.start);
    assert!(first.start, "press edge never arrived");

    // Still held: no further edges.
    thread::sleep(Duration::from_millis(30));
    assert!(!sampler.drain().start);

    // Release and press again: a fresh edge.
    button.0.store(false, Ordering::Relaxed);
    thread::sleep(Duration::from_millis(30));
    button.0.store(true, Ordering::Relaxed);
    let again = drain_until(&sampler, Duration::from_secs(1), |m| m.start);
    assert!(again.start, "second press edge never arrived");
}

#[test]
fn pot_failures_are_counted_not_fatal() {
    let sampler = InputSampler::spawn(
        ScriptedEncoder::default(),
        IdleStart,
        BrokenPot,
        1,
        MonotonicClock::new(),
    );
    thread::sleep(Duration::from_millis(50));
    assert!(sampler.pot_errors() > 0, "failures were not counted");
    assert_eq!(sampler.drain().pot_raw, None);

    // Thread is still alive and still trying.
    let before = sampler.pot_errors();
    thread::sleep(Duration::from_millis(50));
    assert!(sampler.pot_errors() > before, "sampler died on a pot error");
}
