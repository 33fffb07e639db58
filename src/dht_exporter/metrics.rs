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

use crate::sensor::SensorReader;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, Opts};
use std::sync::{Mutex, PoisonError};
use tracing::Span;

pub const TEMPERATURE_METRIC: &str = "dht_temperature_degree";
pub const HUMIDITY_METRIC: &str = "dht_humidity_percent";

pub const TEMPERATURE_LABELS: [&str; 4] = ["dht_name", "hostname", "gpio", "unit"];
pub const HUMIDITY_LABELS: [&str; 3] = ["dht_name", "hostname", "gpio"];

const TEMPERATURE_HELP: &str = "Temperature degree measured by the sensor";
const HUMIDITY_HELP: &str = "Humidity percent measured by the sensor";

/// Label value identifying the GPIO pin a sensor is attached to, e.g. `GPIO4`.
pub fn gpio_label(pin: u8) -> String {
    format!("GPIO{}", pin)
}

/// Hostname of the machine, or an empty string if it can't be determined.
pub fn resolve_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::warn!(message = "unable to resolve hostname, using empty value", error = %e);
            String::new()
        }
    }
}

/// Prometheus Collector implementation that reads temperature and humidity from
/// a single sensor on every scrape and emits both as gauges.
///
/// Sensor name, hostname, GPIO pin and temperature unit never change for the life
/// of the process and are attached to each gauge as constant labels. This makes
/// the descriptors of every sensor distinct while sharing metric and label names.
///
/// The reader is behind a mutex so that overlapping scrapes never read the same
/// sensor at the same time. Different sensors have different locks and may be
/// read in parallel.
pub struct SensorCollector<R> {
    reader: Mutex<R>,
    name: String,
    hostname: String,
    temperature: Gauge,
    humidity: Gauge,
    span: Span,
}

impl<R> SensorCollector<R>
where
    R: SensorReader,
{
    /// Create a collector for `reader`, resolving the hostname once.
    pub fn new(reader: R, span: Span) -> Result<Self, prometheus::Error> {
        let hostname = span.in_scope(resolve_hostname);
        Self::with_hostname(reader, hostname, span)
    }

    pub fn with_hostname<S>(reader: R, hostname: S, span: Span) -> Result<Self, prometheus::Error>
    where
        S: Into<String>,
    {
        let name = reader.name().to_owned();
        let hostname = hostname.into();
        let gpio = gpio_label(reader.pin());

        let temperature = Gauge::with_opts(
            Opts::new(TEMPERATURE_METRIC, TEMPERATURE_HELP)
                .const_label(TEMPERATURE_LABELS[0], name.clone())
                .const_label(TEMPERATURE_LABELS[1], hostname.clone())
                .const_label(TEMPERATURE_LABELS[2], gpio.clone())
                .const_label(TEMPERATURE_LABELS[3], reader.unit().symbol()),
        )?;

        let humidity = Gauge::with_opts(
            Opts::new(HUMIDITY_METRIC, HUMIDITY_HELP)
                .const_label(HUMIDITY_LABELS[0], name.clone())
                .const_label(HUMIDITY_LABELS[1], hostname.clone())
                .const_label(HUMIDITY_LABELS[2], gpio),
        )?;

        span.in_scope(|| tracing::debug!(message = "created sensor collector", hostname = %hostname));

        Ok(Self {
            reader: Mutex::new(reader),
            name,
            hostname,
            temperature,
            humidity,
            span,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

impl<R> Collector for SensorCollector<R>
where
    R: SensorReader + Send,
{
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.temperature.desc());
        descs.extend(self.humidity.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _enter = self.span.enter();
        // A panic mid-read leaves nothing half updated in the reader, keep using it.
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);

        match reader.read_data() {
            Ok(sample) => {
                self.temperature.set(sample.temperature);
                self.humidity.set(sample.humidity.into());

                let mut mfs = Vec::with_capacity(2);
                mfs.extend(self.temperature.collect());
                mfs.extend(self.humidity.collect());
                mfs
            }
            Err(_) => {
                tracing::debug!(message = "omitting sensor metrics from scrape", sensor = %self.name);
                Vec::new()
            }
        }
    }
}
