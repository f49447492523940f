//! ADC adapter for the touch sensor.

use esp_hal::analog::adc::{Adc, AdcConfig, AdcPin, Attenuation};
use esp_hal::peripherals::{ADC1, GPIO32};
use esp_hal::Blocking;

use crate::ports::TouchProbe;

pub struct AdcTouchProbe<'d> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    pin: AdcPin<GPIO32<'d>, ADC1<'d>>,
}

impl<'d> AdcTouchProbe<'d> {
    pub fn new(adc: ADC1<'d>, gpio: GPIO32<'d>) -> Self {
        let mut config = AdcConfig::new();
        // Full-range attenuation: the sensor plate swings rail to rail.
        let pin = config.enable_pin(gpio, Attenuation::_11dB);
        Self {
            adc: Adc::new(adc, config),
            pin,
        }
    }
}

impl TouchProbe for AdcTouchProbe<'_> {
    fn read_raw(&mut self) -> u16 {
        // 12-bit conversion widened to the full 16-bit sensor range the
        // delta thresholds are calibrated against.
        let sample = self.adc.read_blocking(&mut self.pin);
        sample << 4
    }
}
