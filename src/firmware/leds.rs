//! Smartled strip adapter.
//!
//! The core renders one uniform color per frame; this adapter fans it out
//! over the configured pixel count and pushes it through the RMT-driven
//! WS2812 driver.

use esp_hal::peripherals::{GPIO27, RMT};
use esp_hal::rmt::Rmt;
use esp_hal::time::Rate;
use esp_hal::Blocking;
use esp_hal_smartled::{smart_led_buffer, SmartLedsAdapter};
use smart_leds::{SmartLedsWrite, RGB8};

use crate::color::Rgb;
use crate::ports::LampStrip;

/// Upper bound on addressable pixels; the RMT pulse buffer is sized for
/// this at compile time.
pub const MAX_PIXELS: usize = 64;

const PULSE_BUFFER: usize = MAX_PIXELS * 24 + 1;

pub struct SmartStrip<'d> {
    adapter: SmartLedsAdapter<esp_hal::rmt::Channel<Blocking, 0>, PULSE_BUFFER>,
    pixels: [RGB8; MAX_PIXELS],
    count: usize,
    _lifetime: core::marker::PhantomData<&'d ()>,
}

impl<'d> SmartStrip<'d> {
    pub fn new(rmt: RMT<'d>, data_pin: GPIO27<'d>, count: usize) -> Self {
        let rmt = Rmt::new(rmt, Rate::from_mhz(80)).expect("rmt init failed");
        let adapter = SmartLedsAdapter::new(rmt.channel0, data_pin, smart_led_buffer!(MAX_PIXELS));
        Self {
            adapter,
            pixels: [RGB8::default(); MAX_PIXELS],
            count: count.min(MAX_PIXELS),
            _lifetime: core::marker::PhantomData,
        }
    }

    pub fn set_pixel_count(&mut self, count: usize) {
        if count > MAX_PIXELS {
            log::warn!("num_leds {count} capped at {MAX_PIXELS}");
        }
        self.count = count.min(MAX_PIXELS);
    }
}

impl LampStrip for SmartStrip<'_> {
    fn fill(&mut self, color: Rgb) {
        let pixel = RGB8::new(color.r, color.g, color.b);
        for slot in self.pixels[..self.count].iter_mut() {
            *slot = pixel;
        }
        if self
            .adapter
            .write(self.pixels[..self.count].iter().copied())
            .is_err()
        {
            log::warn!("strip write failed");
        }
    }
}
