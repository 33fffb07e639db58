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

use crate::sensor::core::{open_pin, DataPin, Humidity, SensorError, TemperatureUnit};
use crate::sensor::dht22::DHT22Sensor;
use std::fmt;
use tracing::Span;

/// Static facts about a configured sensor. Built once at startup and never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdentity {
    pub name: String,
    pub pin: u8,
    pub unit: TemperatureUnit,
    pub max_retries: u32,
}

impl SensorIdentity {
    pub fn new<S: Into<String>>(name: S, pin: u8, unit: TemperatureUnit, max_retries: u32) -> Self {
        Self {
            name: name.into(),
            pin,
            unit,
            max_retries,
        }
    }
}

/// Humidity and temperature from one successful read. Temperature is expressed
/// in the unit of the reader that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub humidity: Humidity,
    pub temperature: f64,
}

impl Sample {
    pub fn new(humidity: f64, temperature: f64) -> Self {
        Self {
            humidity: Humidity::from(humidity),
            temperature,
        }
    }
}

/// A single temperature and humidity sensor.
///
/// `read_data` blocks for as long as the sensor takes, retrying internally, and
/// only returns an error after every attempt has failed. Implementations log
/// their own failures. Callers must not invoke `read_data` concurrently on the
/// same sensor, which the `&mut self` receiver enforces.
pub trait SensorReader {
    fn read_data(&mut self) -> Result<Sample, SensorError>;
    fn name(&self) -> &str;
    fn unit(&self) -> TemperatureUnit;
    fn pin(&self) -> u8;
}

/// Call `attempt` until it succeeds or `max_retries` attempts have been made.
///
/// At least one attempt is always made. When every attempt fails the last error
/// is returned wrapped in `SensorError::Retries`.
pub fn read_with_retry<T, F>(max_retries: u32, mut attempt: F) -> Result<T, SensorError>
where
    F: FnMut() -> Result<T, SensorError>,
{
    let max_attempts = max_retries.max(1);
    let mut num = 1;

    loop {
        match attempt() {
            Ok(v) => return Ok(v),
            Err(e) if num >= max_attempts => return Err(SensorError::Retries(num, Box::new(e))),
            Err(e) => {
                tracing::debug!(
                    message = "sensor read attempt failed, retrying",
                    attempt = num,
                    max_attempts = max_attempts,
                    error = %e,
                );
                num += 1;
            }
        }
    }
}

/// `SensorReader` backed by a DHT22 sensor attached to a GPIO pin.
pub struct Dht22Reader {
    identity: SensorIdentity,
    sensor: DHT22Sensor,
    span: Span,
}

impl Dht22Reader {
    /// Acquire the GPIO pin for the sensor. Failure here means the sensor can never
    /// be read and is reported as an `Initialization` error.
    pub fn open(identity: SensorIdentity, span: Span) -> Result<Self, SensorError> {
        let pin = span.in_scope(|| {
            tracing::info!(message = "initializing DHT22 sensor");
            open_pin(identity.pin)
        })?;

        Ok(Self::from_sensor(identity, DHT22Sensor::from_pin(pin), span))
    }

    pub fn from_sensor(identity: SensorIdentity, sensor: DHT22Sensor, span: Span) -> Self {
        Self { identity, sensor, span }
    }

    /// Convenience for building a reader over any `DataPin` implementation.
    pub fn from_pin<T>(identity: SensorIdentity, pin: T, span: Span) -> Self
    where
        T: DataPin + Send + Sync + 'static,
    {
        Self::from_sensor(identity, DHT22Sensor::from_pin(pin), span)
    }
}

impl SensorReader for Dht22Reader {
    fn read_data(&mut self) -> Result<Sample, SensorError> {
        let _enter = self.span.enter();
        let unit = self.identity.unit;
        let sensor = &mut self.sensor;

        match read_with_retry(self.identity.max_retries, || sensor.read()) {
            Ok((temp, humidity)) => {
                let sample = Sample {
                    humidity,
                    temperature: unit.convert(temp),
                };

                tracing::debug!(
                    message = "sensor data retrieved",
                    humidity = %sample.humidity,
                    temperature = sample.temperature,
                    unit = %unit,
                );

                Ok(sample)
            }
            Err(e) => {
                tracing::error!(
                    message = "failed to read sensor data",
                    kind = e.kind().as_label(),
                    error = %e,
                );

                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    fn unit(&self) -> TemperatureUnit {
        self.identity.unit
    }

    fn pin(&self) -> u8 {
        self.identity.pin
    }
}

impl fmt::Debug for Dht22Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dht22Reader")
            .field("identity", &self.identity)
            .field("sensor", &self.sensor)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{read_with_retry, Dht22Reader, SensorIdentity, SensorReader};
    use crate::sensor::core::{Humidity, SensorError, SensorErrorKind, TemperatureUnit};
    use crate::sensor::dht22::DHT22Sensor;
    use crate::sensor::test::{datasheet_bytes, MockDataPin, TimeoutDataPin};
    use std::time::Duration;
    use tracing::Span;

    fn timeout() -> SensorError {
        SensorError::KindMsg(SensorErrorKind::ReadTimeout, "timeout")
    }

    #[test]
    fn test_retry_first_attempt_succeeds() {
        let mut calls = 0;
        let res = read_with_retry(5, || {
            calls += 1;
            Ok::<_, SensorError>(calls)
        });

        assert_eq!(1, res.unwrap());
        assert_eq!(1, calls);
    }

    #[test]
    fn test_retry_succeeds_after_failures() {
        let mut calls = 0;
        let res = read_with_retry(5, || {
            calls += 1;
            if calls < 3 {
                Err(SensorError::CheckSum(1, 2))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(3, res.unwrap());
        assert_eq!(3, calls);
    }

    #[test]
    fn test_retry_exhausted() {
        let mut calls = 0;
        let res: Result<(), _> = read_with_retry(4, || {
            calls += 1;
            Err(timeout())
        });

        assert_eq!(4, calls);
        match res.unwrap_err() {
            SensorError::Retries(attempts, last) => {
                assert_eq!(4, attempts);
                assert_eq!(SensorErrorKind::ReadTimeout, last.kind());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_retry_zero_still_attempts_once() {
        let mut calls = 0;
        let res: Result<(), _> = read_with_retry(0, || {
            calls += 1;
            Err(timeout())
        });

        assert!(res.is_err());
        assert_eq!(1, calls);
    }

    #[test]
    fn test_dht22_reader_accessors() {
        let identity = SensorIdentity::new("porch", 17, TemperatureUnit::Fahrenheit, 3);
        let reader = Dht22Reader::from_pin(identity, TimeoutDataPin, Span::none());

        assert_eq!("porch", reader.name());
        assert_eq!(17, reader.pin());
        assert_eq!(TemperatureUnit::Fahrenheit, reader.unit());
    }

    #[test]
    fn test_dht22_reader_celsius() {
        let identity = SensorIdentity::new("attic", 4, TemperatureUnit::Celsius, 3);
        let mut reader = Dht22Reader::from_pin(identity, MockDataPin::new(datasheet_bytes()), Span::none());
        let sample = reader.read_data().unwrap();

        assert_eq!(Humidity::from(65.2), sample.humidity);
        assert_eq!(35.1, sample.temperature);
    }

    #[test]
    fn test_dht22_reader_fahrenheit() {
        let identity = SensorIdentity::new("attic", 4, TemperatureUnit::Fahrenheit, 3);
        let mut reader = Dht22Reader::from_pin(identity, MockDataPin::new(datasheet_bytes()), Span::none());
        let sample = reader.read_data().unwrap();

        assert_eq!(Humidity::from(65.2), sample.humidity);
        assert!((sample.temperature - 95.18).abs() < 1e-9);
    }

    #[test]
    fn test_dht22_reader_fails_after_retries() {
        let identity = SensorIdentity::new("garage", 22, TemperatureUnit::Celsius, 3);
        let sensor = DHT22Sensor::from_pin(TimeoutDataPin).with_min_interval(Duration::ZERO);
        let mut reader = Dht22Reader::from_sensor(identity, sensor, Span::none());
        let res = reader.read_data();

        match res.unwrap_err() {
            SensorError::Retries(attempts, _) => assert_eq!(3, attempts),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
