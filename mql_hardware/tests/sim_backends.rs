//! Behavior of the simulated backends the default (no `hardware`) build
//! runs against.
//!
//! Asserts:
//! - clones are views of the same device, including across threads
//! - the simulated wheel walks the quadrature cycle edge by edge, both ways
//! - the pot reports exactly what the driving side set

use std::thread;
use std::time::Duration;

use mql_hardware::{
    SimulatedControlHead, SimulatedEnable, SimulatedPot, SimulatedStartButton, SimulatedStepDrive,
};
use mql_traits::{EnableLine, EncoderPins, PotInput, StartInput, StepPulse};
use rstest::rstest;

#[test]
fn enable_level_is_visible_from_a_clone() {
    let mut ena = SimulatedEnable::new();
    let watcher = ena.clone();
    assert!(!watcher.is_high());
    ena.set_level(true).unwrap();
    assert!(watcher.is_high());
    ena.set_level(false).unwrap();
    assert!(!watcher.is_high());
}

#[rstest]
#[case(0)]
#[case(512)]
#[case(1023)]
fn pot_reports_what_the_driver_sets(#[case] raw: u16) {
    let pot = SimulatedPot::default();
    let mut reader = pot.clone();
    pot.set_raw(raw);
    assert_eq!(reader.read().unwrap(), raw);
}

#[test]
fn wheel_edges_follow_the_quadrature_cycle() {
    let mut head = SimulatedControlHead::new();
    assert_eq!(head.phases(), (false, false));

    let cw = [(true, false), (true, true), (false, true), (false, false)];
    for &expect in &cw {
        head.advance(true);
        assert_eq!(head.phases(), expect);
    }

    let ccw = [(false, true), (true, true), (true, false), (false, false)];
    for &expect in &ccw {
        head.advance(false);
        assert_eq!(head.phases(), expect);
    }
}

#[test]
fn head_button_is_shared_state() {
    let head = SimulatedControlHead::new();
    let mut poller = head.clone();
    assert!(!poller.button_pressed());
    head.set_button(true);
    assert!(poller.button_pressed());
}

#[test]
fn start_button_press_crosses_threads() {
    let button = SimulatedStartButton::new();
    let mut reader = button.clone();
    let seen = thread::spawn(move || {
        for _ in 0..500 {
            if reader.pressed() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    });
    button.press();
    assert!(seen.join().unwrap());
    button.release();
}

#[test]
fn step_drive_tallies_pulses_from_a_worker() {
    let drive = SimulatedStepDrive::new();
    let mut worker_half = drive.clone();
    let worker = thread::spawn(move || {
        for _ in 0..100 {
            worker_half.step_pulse().unwrap();
        }
    });
    worker.join().unwrap();
    assert_eq!(drive.emitted(), 100);
}
