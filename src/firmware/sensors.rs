//! Board sensors: BME280 and VEML7700 sharing one I2C bus, plus the
//! capacitive moisture probe on ADC1.

use core::cell::RefCell;

use bme280::i2c::BME280;
use embedded_hal::i2c::I2c as _;
use embedded_hal_bus::i2c::RefCellDevice;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::delay::Delay;
use esp_hal::i2c::master::I2c;
use esp_hal::peripherals::{ADC1, GPIO0};
use log::{error, info, warn};

use crate::config;
use crate::model::Measurement;

pub type MoistureAdc = Adc<'static, ADC1<'static>, Blocking>;
pub type MoistureAdcPin = AdcPin<GPIO0<'static>, ADC1<'static>>;

type SharedI2c = RefCellDevice<'static, I2c<'static, Blocking>>;

const VEML7700_ADDRESS: u8 = 0x10;
const VEML7700_CONFIG: u8 = 0x00;
const VEML7700_ALS: u8 = 0x04;
const VEML7700_WHITE: u8 = 0x05;
/// Lux per count at gain 1 and 100 ms integration.
const VEML7700_RESOLUTION: f64 = 0.27264;

const ADC_FULL_SCALE: f64 = 4095.0;
const ADC_POLLS: u32 = 10_000;

pub struct Sensors {
    bme: BME280<SharedI2c>,
    light: SharedI2c,
    adc: MoistureAdc,
    moisture_pin: MoistureAdcPin,
    delay: Delay,
}

impl Sensors {
    /// Configures both I2C sensors. A sensor that does not answer is logged
    /// and later reads report zero for it.
    pub fn new(
        bus: &'static RefCell<I2c<'static, Blocking>>,
        adc: MoistureAdc,
        moisture_pin: MoistureAdcPin,
    ) -> Self {
        let mut delay = Delay::new();

        let mut bme = BME280::new_primary(RefCellDevice::new(bus));
        if let Err(e) = bme.init(&mut delay) {
            error!("Sensors: BME280 init failed: {e:?}");
        }

        let mut light = RefCellDevice::new(bus);
        // Gain 1, 100 ms integration, powered on.
        if let Err(e) = light.write(VEML7700_ADDRESS, &[VEML7700_CONFIG, 0x00, 0x00]) {
            error!("Sensors: VEML7700 init failed: {e:?}");
        }

        Self {
            bme,
            light,
            adc,
            moisture_pin,
            delay,
        }
    }

    pub fn read(&mut self) -> Measurement {
        let (temperature, humidity, pressure) = match self.bme.measure(&mut self.delay) {
            Ok(m) => (
                f64::from(m.temperature),
                f64::from(m.humidity),
                f64::from(m.pressure) / 100.0,
            ),
            Err(e) => {
                error!("Sensors: BME280 read failed: {e:?}");
                (0.0, 0.0, 0.0)
            }
        };

        // The collector's history stores the ALS channel as "white".
        let white = self.read_light(VEML7700_ALS);
        let visible = self.read_light(VEML7700_WHITE);
        let moisture = self.read_moisture();

        info!(
            "Sensors: {moisture:.1} % | {temperature:.2} °C | {humidity:.2} %RH | {pressure:.2} hPa | white {white:.2} | visible {visible:.2}"
        );

        Measurement {
            moisture,
            temperature,
            humidity,
            pressure,
            white,
            visible,
            version: config::FIRMWARE_VERSION,
        }
    }

    fn read_light(&mut self, register: u8) -> f64 {
        let mut data = [0u8; 2];
        match self
            .light
            .write_read(VEML7700_ADDRESS, &[register], &mut data)
        {
            Ok(()) => f64::from(u16::from_le_bytes(data)) * VEML7700_RESOLUTION,
            Err(e) => {
                error!("Sensors: VEML7700 register {register:#04x} read failed: {e:?}");
                0.0
            }
        }
    }

    fn read_moisture(&mut self) -> f64 {
        // Oneshot conversions report "not ready" until the sample completes.
        for _ in 0..ADC_POLLS {
            if let Ok(raw) = self.adc.read_oneshot(&mut self.moisture_pin) {
                return f64::from(raw) / ADC_FULL_SCALE * 100.0;
            }
        }
        warn!("Sensors: moisture conversion did not complete");
        0.0
    }
}
