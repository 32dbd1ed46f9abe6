use esp_hal::gpio::{Level, Output, OutputConfig, RtcPin};
use esp_hal::peripherals::GPIO3;
use log::debug;

use crate::traits::AlertOutput;

/// Alert indicator on an RTC pad, so its level can be latched through deep
/// sleep.
pub struct AlertLed {
    pin: GPIO3<'static>,
    level: Level,
}

impl AlertLed {
    /// Releases the hold left by the previous sleep and turns the LED off.
    pub fn new(pin: GPIO3<'static>) -> Self {
        pin.rtcio_pad_hold(false);
        let mut led = Self {
            pin,
            level: Level::Low,
        };
        led.drive();
        led
    }

    fn drive(&mut self) {
        let _output = Output::new(self.pin.reborrow(), self.level, OutputConfig::default());
    }
}

impl AlertOutput for AlertLed {
    fn set_alert(&mut self, active: bool) {
        self.level = if active { Level::High } else { Level::Low };
        self.drive();
    }

    fn hold(&mut self) {
        self.drive();
        self.pin.rtcio_pad_hold(true);
        debug!("Alert: pad level {:?} held for sleep", self.level);
    }
}
