// dht-exporter - Temperature and humidity metrics exporter for Prometheus
//
// Copyright 2021-2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::sensor::core::{DataPin, Humidity, SensorError, SensorErrorKind, TemperatureCelsius};
use rppal::gpio::Mode;
use std::fmt::{Debug, Formatter};
use std::thread;
use std::time::{Duration, Instant};

pub(crate) const DHT_MAX_COUNT: u32 = 32_000;
pub(crate) const DHT_PULSES: usize = 41;
pub(crate) const DATA_SIZE: usize = 5;

/// The DHT22 datasheet asks for at least two seconds between reads. Reading more
/// often than this returns stale or corrupt data.
pub const MIN_READ_INTERVAL: Duration = Duration::from_secs(2);

/// Cycle counts of how long the sensor data pin spent in low and high states.
///
/// There are 40 low/high transitions we count cycles for. These counts are
/// used to read 40 bits of information from the sensor.
#[derive(Debug)]
struct Pulses {
    // Counts for 41 transitions are stored but the first low/high transition is the
    // sensor acknowledging the start signal and isn't used
    counts: [u32; DHT_PULSES * 2],
}

impl Pulses {
    /// Count the number of cycles the given pin spends in the low and high states for
    /// each of the 41 transitions.
    ///
    /// A `ReadTimeout` error is returned if the pin didn't transition in time. The read
    /// has to be retried in this case.
    ///
    /// NOTE: The pin must already have been sent the high-low-high start signal with
    /// the timings from the DHT22 datasheet.
    fn from_data_pin(pin: &dyn DataPin) -> Result<Self, SensorError> {
        // Twice as many entries as pulses so that the cycles spent both low and high
        // can be stored for each pulse.
        let mut counts: [u32; DHT_PULSES * 2] = [0; DHT_PULSES * 2];

        // Even entries are low counts and odd entries are high counts, the loop advances
        // by two and uses (i + 1) for the high state.
        //
        // Counts stop at DHT_MAX_COUNT, far above the 50 - 200 cycles seen in practice for
        // either state. This is the timeout while waiting for the pin to switch states.
        for i in (0..counts.len()).step_by(2) {
            while pin.is_low() {
                counts[i] += 1;
                if counts[i] >= DHT_MAX_COUNT {
                    return Err(SensorError::KindMsg(
                        SensorErrorKind::ReadTimeout,
                        "timeout waiting for low pulse capture",
                    ));
                }
            }

            while pin.is_high() {
                counts[i + 1] += 1;
                if counts[i + 1] >= DHT_MAX_COUNT {
                    return Err(SensorError::KindMsg(
                        SensorErrorKind::ReadTimeout,
                        "timeout waiting for high pulse capture",
                    ));
                }
            }
        }

        tracing::trace!(message = "captured low/high pulse counts", counts = ?counts);
        Ok(Self { counts })
    }

    /// 40 cycle counts for the pin in the low state.
    fn low(&self) -> impl ExactSizeIterator<Item = &u32> {
        // Start from the 3rd element, the first valid low count. The first low/high
        // transition is skipped since the pin starts out low when the sensor begins
        // sending data and that count is always zero.
        self.counts.iter().skip(2).step_by(2)
    }

    /// 40 cycle counts for the pin in the high state.
    fn high(&self) -> impl ExactSizeIterator<Item = &u32> {
        // Start from the 4th element, the first valid high count. The first low/high
        // transition is skipped for the same reason as `low`.
        self.counts.iter().skip(3).step_by(2)
    }
}

/// Five bytes decoded from pulse counts: two of humidity, two of temperature
/// and a checksum. Only constructed when the checksum matches.
#[derive(Debug)]
struct Reading {
    bytes: [u8; DATA_SIZE],
}

impl Reading {
    fn from_pulses(pulses: &Pulses) -> Result<Self, SensorError> {
        let mut bytes: [u8; DATA_SIZE] = [0; DATA_SIZE];

        // The average low cycle count is the threshold for the high counts that follow
        // each low state. Shorter than the threshold is a 0 bit, longer is a 1 bit.
        let threshold = pulses.low().sum::<u32>() / pulses.low().len() as u32;

        for (i, &v) in pulses.high().enumerate() {
            // 40 high counts make 40 bits. Dividing by eight gives the byte this bit
            // belongs to, and shifting left makes room for it in the LSB.
            let index = i / 8;
            bytes[index] <<= 1;

            if v >= threshold {
                bytes[index] |= 1;
            }
        }

        // Byte five is a checksum of the first four, the read is corrupt if they disagree.
        Self::checksum_bytes(&bytes)?;
        Ok(Reading { bytes })
    }

    fn checksum_bytes(bytes: &[u8; DATA_SIZE]) -> Result<(), SensorError> {
        // From the DHT22 datasheet:
        // > If the data transmission is right, check-sum should be the last 8 bit of
        // > "8 bit integral RH data+8 bit decimal RH data+8 bit integral T data+8 bit
        // > decimal T data".
        let expected = bytes[4];
        let computed = bytes[..4].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));

        tracing::debug!(
            message = "computing checksum for sensor data",
            computed = computed,
            expected = expected
        );

        if computed != expected {
            Err(SensorError::CheckSum(expected, computed))
        } else {
            Ok(())
        }
    }
}

impl From<Reading> for (TemperatureCelsius, Humidity) {
    /// Infallible since a `Reading` only exists once its checksum has been verified.
    fn from(reading: Reading) -> Self {
        // See https://cdn-shop.adafruit.com/datasheets/Digital+humidity+and+temperature+sensor+AM2302.pdf
        // first two bytes are humidity as a u16 * 10
        let humidity_raw = u16::from_be_bytes([reading.bytes[0], reading.bytes[1]]);
        // second two bytes are temperature as a u16 * 10 with the highest bit indicating sign
        let temp_raw = u16::from_be_bytes([reading.bytes[2] & 0b0111_1111, reading.bytes[3]]);

        let humidity_dec = humidity_raw as f64 / 10.0;
        let mut temp_dec = temp_raw as f64 / 10.0;
        // highest bit of the temperature is `1` for a negative value
        if reading.bytes[2] & 0b1000_0000 > 0 {
            temp_dec = -temp_dec;
        }

        let humidity = Humidity::from(humidity_dec);
        let temperature = TemperatureCelsius::from(temp_dec);

        tracing::debug!(
            message = "parsed sensor data",
            raw_temperature = temp_raw,
            raw_humidity = humidity_raw,
            temperature = %temperature,
            humidity = %humidity
        );

        (temperature, humidity)
    }
}

/// Steps of a single read. Every read walks the same path and any step may
/// abort it with an error.
#[derive(Debug)]
enum Phase {
    Idle,
    Start,
    Sample,
    Validate(Pulses),
}

/// Read temperature in degrees celsius and relative humidity from a DHT22 sensor
pub struct DHT22Sensor {
    pin: Box<dyn DataPin + Send + Sync + 'static>,
    min_interval: Duration,
    last_attempt: Option<Instant>,
}

impl DHT22Sensor {
    pub fn from_pin<T>(pin: T) -> Self
    where
        T: DataPin + Send + Sync + 'static,
    {
        Self {
            pin: Box::new(pin),
            min_interval: MIN_READ_INTERVAL,
            last_attempt: None,
        }
    }

    /// Override the minimum time between two reads of the sensor.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    fn wait_for_interval(&self) {
        if let Some(last) = self.last_attempt {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                tracing::trace!(message = "waiting before next sensor read", wait_ms = remaining.as_millis() as u64);
                thread::sleep(remaining);
            }
        }
    }

    fn send_start_signal(&mut self) {
        // https://cdn-shop.adafruit.com/datasheets/Digital+humidity+and+temperature+sensor+AM2302.pdf
        // Host needs to set the sensor:
        // * high to start the read process, waking the sensor up from low-power mode
        // * low for at least 1ms to ensure the sensor detected the start of this process
        // * high for 20-40us to then wait for the sensor's response
        self.pin.set_mode(Mode::Output);
        self.pin.set_high();
        thread::sleep(Duration::from_millis(10));
        self.pin.set_low();
        thread::sleep(Duration::from_millis(20));
        self.pin.set_high();
        thread::sleep(Duration::from_micros(30));
        self.pin.set_mode(Mode::Input);
    }

    /// Make a single attempt to read temperature and humidity from the sensor,
    /// returning an error describing what caused the attempt to fail. Blocks until
    /// the minimum interval since the previous attempt has passed.
    pub fn read(&mut self) -> Result<(TemperatureCelsius, Humidity), SensorError> {
        let mut phase = Phase::Idle;

        loop {
            phase = match phase {
                Phase::Idle => {
                    self.wait_for_interval();
                    Phase::Start
                }
                Phase::Start => {
                    self.last_attempt = Some(Instant::now());
                    self.send_start_signal();
                    Phase::Sample
                }
                Phase::Sample => Phase::Validate(Pulses::from_data_pin(self.pin.as_ref())?),
                Phase::Validate(pulses) => {
                    let reading = Reading::from_pulses(&pulses)?;
                    return Ok(reading.into());
                }
            };
        }
    }
}

impl Debug for DHT22Sensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DHT22Sensor")
            .field("pin", &self.pin.pin())
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
