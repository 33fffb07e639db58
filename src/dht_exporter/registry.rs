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

use crate::metrics::SensorCollector;
use crate::sensor::SensorReader;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use tokio::task;
use tracing::Instrument;

/// Error exposing Prometheus metrics in the text exposition format.
#[derive(Debug)]
pub enum ExpositionError {
    Runtime(&'static str, Box<dyn Error + Send + Sync + 'static>),
    Encoding(&'static str, Box<dyn Error + Send + Sync + 'static>),
}

impl fmt::Display for ExpositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpositionError::Runtime(msg, ref e) => write!(f, "{}: {}", msg, e),
            ExpositionError::Encoding(msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for ExpositionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExpositionError::Runtime(_, ref e) => Some(e.as_ref()),
            ExpositionError::Encoding(_, ref e) => Some(e.as_ref()),
        }
    }
}

/// Collector shared between the `prometheus::Registry`, which only uses it to
/// reject duplicate descriptors, and the list of collectors read on each scrape.
struct SharedCollector(Arc<dyn Collector>);

impl Collector for SharedCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.0.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.0.collect()
    }
}

/// Set of sensor collectors that are read and encoded together on every scrape.
///
/// Collectors are added once at startup. A sensor that fails to read simply
/// contributes nothing to a scrape, the other sensors are still exposed. Each
/// collector is read on its own thread so a scrape takes about as long as the
/// slowest sensor rather than the sum of all of them.
///
/// Cloning is cheap and clones share the same collectors.
#[derive(Clone, Default)]
pub struct SensorRegistry {
    registry: Registry,
    collectors: Arc<RwLock<Vec<Arc<dyn Collector>>>>,
}

impl fmt::Debug for SensorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorRegistry")
            .field("registry", &self.registry)
            .field("collectors", &self.collectors().len())
            .finish()
    }
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the collector for a sensor. Fails with `prometheus::Error::AlreadyReg` if a
    /// collector with the same metric names and label values is already registered.
    pub fn register<R>(&self, collector: SensorCollector<R>) -> Result<(), prometheus::Error>
    where
        R: SensorReader + Send + 'static,
    {
        let name = collector.name().to_owned();
        self.add(Arc::new(collector))?;

        tracing::debug!(message = "registered sensor collector", sensor = %name);
        Ok(())
    }

    /// Add any other collector, such as process metrics.
    pub fn register_boxed(&self, collector: Box<dyn Collector>) -> Result<(), prometheus::Error> {
        self.add(Arc::from(collector))
    }

    fn add(&self, collector: Arc<dyn Collector>) -> Result<(), prometheus::Error> {
        self.registry.register(Box::new(SharedCollector(collector.clone())))?;
        self.collectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(collector);
        Ok(())
    }

    fn collectors(&self) -> Vec<Arc<dyn Collector>> {
        self.collectors.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run every collector concurrently and merge the results into metric families
    /// sorted by name, each with its metrics sorted by label values. Empty families
    /// are dropped. A collector that panics contributes nothing.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let collectors = self.collectors();
        let collected: Vec<Vec<MetricFamily>> = thread::scope(|s| {
            let handles: Vec<_> = collectors
                .iter()
                .map(|c| s.spawn(move || c.collect()))
                .collect();

            handles
                .into_iter()
                .filter_map(|h| match h.join() {
                    Ok(families) => Some(families),
                    Err(_) => {
                        tracing::error!(message = "metric collector panicked, skipping its metrics");
                        None
                    }
                })
                .collect()
        });

        let mut by_name: BTreeMap<String, MetricFamily> = BTreeMap::new();
        for mut family in collected.into_iter().flatten() {
            if family.get_metric().is_empty() {
                continue;
            }

            match by_name.get_mut(family.get_name()) {
                Some(existing) => {
                    for m in family.take_metric().into_iter() {
                        existing.mut_metric().push(m);
                    }
                }
                None => {
                    by_name.insert(family.get_name().to_owned(), family);
                }
            }
        }

        by_name
            .into_values()
            .map(|mut family| {
                family.mut_metric().sort_by(|a, b| {
                    let a = a.get_label().iter().map(|l| l.get_value());
                    let b = b.get_label().iter().map(|l| l.get_value());
                    a.cmp(b)
                });
                family
            })
            .collect()
    }

    /// Read every sensor and encode all resulting metrics in the Prometheus text
    /// exposition format. Blocks while sensors are being read.
    pub fn gather_and_serialize(&self) -> Result<Vec<u8>, ExpositionError> {
        let metric_families = self.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        tracing::debug!(
            message = "encoding metric families to text exposition format",
            num_metrics = metric_families.len(),
        );

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ExpositionError::Encoding("unable to encode Prometheus metrics", Box::new(e)))
            .map(|_| buffer)
    }

    /// Same as `gather_and_serialize` but runs on the blocking thread pool of the
    /// tokio runtime so that reading sensors (100+ milliseconds each) doesn't block
    /// the future it is called from.
    pub async fn encoded_text(&self) -> Result<Vec<u8>, ExpositionError> {
        let registry = self.clone();

        task::spawn_blocking(move || registry.gather_and_serialize())
            .instrument(tracing::debug_span!("sensor_gather"))
            .await
            .map_err(|e| ExpositionError::Runtime("unable to gather Prometheus metrics", Box::new(e)))?
    }
}
