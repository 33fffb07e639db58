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

use clap::{crate_version, Parser};
use dht_exporter::config::{parse_level, ConfigError, ExporterConfig};
use dht_exporter::http::{http_route, RequestContext};
use dht_exporter::metrics::SensorCollector;
use dht_exporter::registry::SensorRegistry;
use dht_exporter::sensor::Dht22Reader;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use std::{io, process};
use tokio::signal::unix::{self, SignalKind};
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_IP: [u8; 4] = [0, 0, 0, 0];

/// Expose temperature and humidity from DHT22 sensors as Prometheus metrics
///
/// Read temperature and humidity from one or more DHT22 sensors connected to the
/// GPIO pins of a local machine, usually a Raspberry PI, every time metrics are
/// scraped. Sensors are described in a YAML or JSON configuration file.
#[derive(Debug, Parser)]
#[clap(name = "dht-exporter", version = crate_version!())]
struct DhtExporterApplication {
    /// Path to the configuration file, read as JSON if it ends in .json and YAML otherwise.
    /// By default, dht-prometheus-exporter.yaml, dht-prometheus-exporter.yml, and
    /// dht-exporter.json are looked for in /etc, $HOME, and the current directory
    #[clap(long)]
    config: Option<PathBuf>,

    /// Logging verbosity, overrides the configuration file. Allowed values are 'trace',
    /// 'debug', 'info', 'warn', and 'error' (case insensitive)
    #[clap(long)]
    log_level: Option<Level>,

    /// Address to bind to, overrides the port from the configuration file. By default,
    /// the exporter binds to all addresses since the purpose is to expose metrics to an
    /// external system
    #[clap(long)]
    bind: Option<SocketAddr>,
}

fn load_config(opts: &DhtExporterApplication) -> Result<ExporterConfig, ConfigError> {
    match &opts.config {
        Some(path) => ExporterConfig::load(path),
        None => ExporterConfig::discover(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = DhtExporterApplication::parse();
    let config = load_config(&opts);

    let configured_level = config.as_ref().ok().map(|c| c.log_level.as_str());
    let parsed_level = configured_level.and_then(parse_level);
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level.or(parsed_level).unwrap_or(DEFAULT_LOG_LEVEL))
            .finish(),
    )?;

    if let (None, Some(level), None) = (opts.log_level, configured_level, parsed_level) {
        tracing::warn!(message = "invalid log level in configuration, using default", log_level = level, default = %DEFAULT_LOG_LEVEL);
    }

    let config = config.unwrap_or_else(|e| {
        tracing::error!(message = "failed to load configuration", error = %e);
        process::exit(1)
    });

    let startup = Instant::now();
    let registry = SensorRegistry::new();

    for identity in config.identities() {
        let span = tracing::info_span!("sensor", sensor = %identity.name, gpio = identity.pin);
        let name = identity.name.clone();
        let pin = identity.pin;

        let reader = Dht22Reader::open(identity, span.clone()).unwrap_or_else(|e| {
            tracing::error!(message = "failed to initialize sensor reader", sensor = %name, bcm_pin = pin, error = %e);
            process::exit(1)
        });

        let collector = SensorCollector::new(reader, span).unwrap_or_else(|e| {
            tracing::error!(message = "failed to create sensor metric collector", sensor = %name, error = %e);
            process::exit(1)
        });

        registry.register(collector).unwrap_or_else(|e| {
            tracing::error!(message = "failed to register sensor metric collector", sensor = %name, error = %e);
            process::exit(1)
        });
    }

    register_process_collector(&registry);
    tracing::info!(message = "initialized sensors", num_sensors = config.sensors.len());

    let bind = opts
        .bind
        .unwrap_or_else(|| SocketAddr::from((DEFAULT_BIND_IP, config.listen_port)));
    let context = Arc::new(RequestContext::new(registry));
    let service = make_service_fn(move |_| {
        let context = context.clone();

        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                http_route(req, context.clone()).instrument(tracing::debug_span!("dht_request"))
            }))
        }
    });

    let server = Server::try_bind(&bind).unwrap_or_else(|e| {
        tracing::error!(message = "error starting server", address = %bind, error = %e);
        process::exit(1)
    });

    tracing::info!(message = "starting server", address = %bind);

    server
        .serve(service)
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!(message = "server shutdown", runtime_secs = %startup.elapsed().as_secs());
    Ok(())
}

#[cfg(target_os = "linux")]
fn register_process_collector(registry: &SensorRegistry) {
    let collector = prometheus::process_collector::ProcessCollector::for_self();
    if let Err(e) = registry.register_boxed(Box::new(collector)) {
        tracing::warn!(message = "failed to register process metric collector", error = %e);
    }
}

#[cfg(not(target_os = "linux"))]
fn register_process_collector(_registry: &SensorRegistry) {}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
