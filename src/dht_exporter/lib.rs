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

//! Export temperature and humidity readings from DHT22 sensors as Prometheus metrics.
//!
//! ## Features
//!
//! `dht-exporter` reads temperature and humidity from one or more [DHT22 sensors](https://learn.adafruit.com/dht)
//! attached to the GPIO pins of a Raspberry PI and exports the values as Prometheus metrics.
//! Sensors are read on demand, every time Prometheus scrapes the exporter.
//!
//! The following metrics are exported for each sensor:
//!
//! * `dht_temperature_degree{dht_name, hostname, gpio, unit}` - Temperature measured by the
//!   sensor, in degrees celsius (`unit="C"`) or fahrenheit (`unit="F"`).
//! * `dht_humidity_percent{dht_name, hostname, gpio}` - Relative humidity (from 0 to 100)
//!   measured by the sensor.
//!
//! If a sensor can't be read after the configured number of attempts, both of its metrics
//! are left out of that scrape. Other sensors are unaffected.
//!
//! ## Build
//!
//! `dht-exporter` must be built from source using a [Rust toolchain](https://rustup.rs/)
//! and will most likely need to be cross-compiled for the Raspberry PI. On Ubuntu GNU/Linux
//! you'll need the following packages.
//!
//! ```text
//! apt-get install gcc-arm-linux-gnueabihf musl-tools
//! rustup target add armv7-unknown-linux-musleabihf
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Configuration
//!
//! Sensors are configured in a YAML file named `dht-prometheus-exporter.yaml` (or `.yml`),
//! looked for in `/etc`, the home directory, and the current directory (in that order)
//! unless a path is given with `--config`. A JSON file named `dht-exporter.json` is also
//! accepted.
//!
//! ```yaml
//! listen_port: 8080
//! log_level: info
//! sensors:
//!   - name: kitchen
//!     gpio_pin: 4
//!     max_retries: 5
//!     temperature_unit: celsius
//!   - name: garage
//!     gpio_pin: 17
//!     max_retries: 5
//!     temperature_unit: fahrenheit
//! ```
//!
//! Older single sensor files that set `name`, `gpio_pin`, `max_retries`, and
//! `temperature_unit` at the top level still load, as a configuration with one sensor.
//!
//! `gpio_pin` is the BCM GPIO pin number of the sensor data line, NOT the physical pin
//! number. See the [Raspberry PI documentation](https://www.raspberrypi.com/documentation/computers/os.html#gpio-and-the-40-pin-header).
//!
//! ## Prometheus
//!
//! Metrics are exposed at `/metrics`, `/health` and `/ready` always return `200 OK`.
//!
//! **NOTE**: The DHT22 sensor can only be read every two seconds, at most, and each failed
//! attempt is retried up to `max_retries` times. A scrape of a struggling sensor can
//! therefore take `2 * max_retries` seconds. Keep the Prometheus scrape timeout and
//! `max_retries` in line with each other.
//!
//! ```yaml
//! scrape_configs:
//!   - job_name: dht
//!     scrape_interval: 1m
//!     scrape_timeout: 15s
//!     static_configs:
//!       - targets: ['example:8080']
//! ```
//!

pub mod config;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod sensor;
