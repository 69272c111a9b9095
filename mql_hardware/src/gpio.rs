//! Raspberry Pi backends over `rppal`: output pins for the stepper driver,
//! polled inputs for the control head, async edge interrupts for the
//! quadrature pair, and an MCP3008 ADC channel for the flow pot.
//!
//! Buttons and encoder contacts are wired switch-to-ground with the
//! internal pull-ups on, so "pressed" reads as a low level.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mql_traits::{EnableLine, EncoderPins, PotInput, StartInput, StepPulse};
use rppal::gpio::{Event, Gpio, InputPin, Level, OutputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::{debug, trace};

use crate::error::{HwError, Result};

/// STEP high time. The DRV8825 needs at least 1.9 µs per phase; 4 µs leaves
/// margin and still fits comfortably inside the 500 µs period at full rate.
const STEP_PULSE: Duration = Duration::from_micros(4);

/// Busy-wait; at single-microsecond widths a sleep would overshoot by
/// orders of magnitude.
fn spin_wait(width: Duration) {
    let from = Instant::now();
    while from.elapsed() < width {
        std::hint::spin_loop();
    }
}

fn open_gpio() -> Result<Gpio> {
    Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))
}

fn claim_input_pullup(gpio: &Gpio, pin: u8) -> Result<InputPin> {
    Ok(gpio
        .get(pin)
        .map_err(|e| HwError::Gpio(e.to_string()))?
        .into_input_pullup())
}

fn claim_output(gpio: &Gpio, pin: u8, high: bool) -> Result<OutputPin> {
    let pin = gpio.get(pin).map_err(|e| HwError::Gpio(e.to_string()))?;
    Ok(if high {
        pin.into_output_high()
    } else {
        pin.into_output_low()
    })
}

/// STEP plus DIR lines of the stepper driver. DIR is fixed at claim time;
/// the pump only ever runs one direction.
pub struct GpioStepDrive {
    step: OutputPin,
    _dir: OutputPin,
}

impl GpioStepDrive {
    pub fn new(step_pin: u8, dir_pin: u8, dir_high: bool) -> Result<Self> {
        let gpio = open_gpio()?;
        let step = claim_output(&gpio, step_pin, false)?;
        let dir = claim_output(&gpio, dir_pin, dir_high)?;
        debug!(step_pin, dir_pin, dir_high, "claimed stepper STEP/DIR");
        Ok(Self { step, _dir: dir })
    }
}

impl StepPulse for GpioStepDrive {
    fn step_pulse(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.step.set_high();
        spin_wait(STEP_PULSE);
        self.step.set_low();
        Ok(())
    }
}

/// ENA line of the stepper driver. Claimed already driving the disabled
/// level so the motor cannot twitch between claim and the first command.
pub struct GpioEnableLine {
    ena: OutputPin,
}

impl GpioEnableLine {
    pub fn new(pin: u8, disabled_high: bool) -> Result<Self> {
        let ena = claim_output(&open_gpio()?, pin, disabled_high)?;
        debug!(pin, disabled_high, "claimed stepper ENA");
        Ok(Self { ena })
    }
}

impl EnableLine for GpioEnableLine {
    fn set_level(&mut self, high: bool) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.ena.write(if high { Level::High } else { Level::Low });
        Ok(())
    }
}

/// Control head on polled pins: quadrature pair plus push button.
pub struct GpioControlHead {
    a: InputPin,
    b: InputPin,
    button: InputPin,
}

impl GpioControlHead {
    pub fn new(a_pin: u8, b_pin: u8, button_pin: u8) -> Result<Self> {
        let gpio = open_gpio()?;
        let head = Self {
            a: claim_input_pullup(&gpio, a_pin)?,
            b: claim_input_pullup(&gpio, b_pin)?,
            button: claim_input_pullup(&gpio, button_pin)?,
        };
        debug!(a_pin, b_pin, button_pin, "claimed control head (polled)");
        Ok(head)
    }
}

impl EncoderPins for GpioControlHead {
    fn phases(&mut self) -> (bool, bool) {
        (self.a.is_high(), self.b.is_high())
    }

    fn button_pressed(&mut self) -> bool {
        self.button.is_low()
    }
}

/// Button half of the control head, for when the quadrature pair is
/// serviced by interrupts and the poller must not touch A/B.
pub struct GpioHeadButton {
    button: InputPin,
}

impl GpioHeadButton {
    pub fn new(button_pin: u8) -> Result<Self> {
        let button = claim_input_pullup(&open_gpio()?, button_pin)?;
        debug!(button_pin, "claimed control head button");
        Ok(Self { button })
    }
}

impl EncoderPins for GpioHeadButton {
    /// A/B live on the interrupt path; nothing reads phases here.
    fn phases(&mut self) -> (bool, bool) {
        (false, false)
    }

    fn button_pressed(&mut self) -> bool {
        self.button.is_low()
    }
}

/// Momentary start/stop button.
pub struct GpioStartButton {
    pin: InputPin,
}

impl GpioStartButton {
    pub fn new(pin: u8) -> Result<Self> {
        let pin = claim_input_pullup(&open_gpio()?, pin)?;
        Ok(Self { pin })
    }
}

impl StartInput for GpioStartButton {
    fn pressed(&mut self) -> bool {
        self.pin.is_low()
    }
}

/// Flow pot behind an MCP3008 on SPI0/CE0.
pub struct Mcp3008Pot {
    spi: Spi,
    channel: u8,
}

impl Mcp3008Pot {
    /// 1.35 MHz is the MCP3008 ceiling at 3.3 V supply.
    const CLOCK_HZ: u32 = 1_350_000;

    pub fn new(channel: u8) -> Result<Self> {
        if channel > 7 {
            return Err(HwError::AdcChannel(channel));
        }
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, Self::CLOCK_HZ, Mode::Mode0)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        debug!(channel, "opened MCP3008 on SPI0/CE0");
        Ok(Self { spi, channel })
    }

    fn sample(&mut self) -> Result<u16> {
        // Start bit, then single-ended mode + channel in the high nibble.
        let tx = [0x01, (0x08 | self.channel) << 4, 0x00];
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        let raw = (u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]);
        trace!(raw, "pot sample");
        Ok(raw)
    }
}

impl PotInput for Mcp3008Pot {
    fn read(&mut self) -> std::result::Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.sample()?)
    }
}

/// Live quadrature interrupt registration. Dropping it detaches both
/// interrupts and releases the pins.
pub struct QuadratureIsr {
    _a: InputPin,
    _b: InputPin,
}

/// Register edge interrupts on both quadrature pins and deliver every edge
/// as `(a, b, timestamp_us)` to `on_edge`. Timestamps come from the kernel
/// event, so bounce rejection sees when the edge happened rather than when
/// the callback ran. Debouncing itself is left to the decoder.
///
/// Each pin's interrupt updates its own cached level and reads the other
/// pin's cache, so the callback always sees a coherent pair without
/// touching GPIO from interrupt context.
pub fn attach_quadrature_isr<F>(a_pin: u8, b_pin: u8, on_edge: F) -> Result<QuadratureIsr>
where
    F: FnMut(bool, bool, u64) + Send + 'static,
{
    let gpio = open_gpio()?;
    let mut a = claim_input_pullup(&gpio, a_pin)?;
    let mut b = claim_input_pullup(&gpio, b_pin)?;

    let a_level = Arc::new(AtomicBool::new(a.is_high()));
    let b_level = Arc::new(AtomicBool::new(b.is_high()));
    let on_edge = Arc::new(Mutex::new(on_edge));

    {
        let (a_level, b_level) = (a_level.clone(), b_level.clone());
        let on_edge = on_edge.clone();
        a.set_async_interrupt(Trigger::Both, None, move |event: Event| {
            let high = event.trigger == Trigger::RisingEdge;
            a_level.store(high, Ordering::Relaxed);
            if let Ok(mut cb) = on_edge.lock() {
                cb(
                    high,
                    b_level.load(Ordering::Relaxed),
                    event.timestamp.as_micros() as u64,
                );
            }
        })
        .map_err(|e| HwError::Gpio(e.to_string()))?;
    }
    {
        b.set_async_interrupt(Trigger::Both, None, move |event: Event| {
            let high = event.trigger == Trigger::RisingEdge;
            b_level.store(high, Ordering::Relaxed);
            if let Ok(mut cb) = on_edge.lock() {
                cb(
                    a_level.load(Ordering::Relaxed),
                    high,
                    event.timestamp.as_micros() as u64,
                );
            }
        })
        .map_err(|e| HwError::Gpio(e.to_string()))?;
    }

    debug!(a_pin, b_pin, "quadrature edge interrupts attached");
    Ok(QuadratureIsr { _a: a, _b: b })
}
