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

use crate::sensor::{SensorIdentity, TemperatureUnit};
use serde::Deserialize;
use std::collections::HashSet;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fmt, fs, io};
use tracing::Level;

/// Names of the configuration file looked for in each search directory, in order.
pub const CONFIG_FILE_NAMES: &[&str] = &[
    "dht-prometheus-exporter.yaml",
    "dht-prometheus-exporter.yml",
    "dht-exporter.json",
];

const DEFAULT_LISTEN_PORT: u16 = 8080;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Error finding, reading, parsing, or validating the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    NotFound(Vec<PathBuf>),
    Io(PathBuf, io::Error),
    Parse(PathBuf, Box<dyn Error + Send + Sync + 'static>),
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotFound(paths) => {
                let searched: Vec<_> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "no configuration file found, searched: {}", searched.join(", "))
            }
            ConfigError::Io(path, ref e) => write!(f, "unable to read {}: {}", path.display(), e),
            ConfigError::Parse(path, ref e) => write!(f, "unable to parse {}: {}", path.display(), e),
            ConfigError::Validation(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(_, ref e) => Some(e),
            ConfigError::Parse(_, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// A single sensor as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    pub gpio_pin: u8,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,
}

impl SensorConfig {
    pub fn identity(&self) -> SensorIdentity {
        SensorIdentity::new(self.name.clone(), self.gpio_pin, self.temperature_unit, self.max_retries)
    }
}

/// Syntax of a configuration file, picked from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Files ending in `.json` are JSON, anything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Exporter configuration, loaded from YAML or JSON.
///
/// ```yaml
/// listen_port: 8080
/// log_level: info
/// sensors:
///   - name: kitchen
///     gpio_pin: 4
///     max_retries: 5
///     temperature_unit: celsius
/// ```
///
/// A single sensor may also be given at the top level, without a `sensors` list:
///
/// ```yaml
/// name: kitchen
/// gpio_pin: 4
/// listen_port: 8080
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawConfig")]
pub struct ExporterConfig {
    pub listen_port: u16,
    pub log_level: String,
    pub sensors: Vec<SensorConfig>,
}

/// Configuration as written in the file, before a top level sensor is folded
/// into the sensor list.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_listen_port")]
    listen_port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    sensors: Vec<SensorConfig>,
    name: Option<String>,
    gpio_pin: Option<u8>,
    max_retries: Option<u32>,
    temperature_unit: Option<TemperatureUnit>,
}

impl From<RawConfig> for ExporterConfig {
    fn from(raw: RawConfig) -> Self {
        let mut sensors = raw.sensors;
        if let (Some(name), Some(gpio_pin)) = (raw.name, raw.gpio_pin) {
            sensors.insert(
                0,
                SensorConfig {
                    name,
                    gpio_pin,
                    max_retries: raw.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                    temperature_unit: raw.temperature_unit.unwrap_or_default(),
                },
            );
        }

        Self {
            listen_port: raw.listen_port,
            log_level: raw.log_level,
            sensors,
        }
    }
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_owned()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl ExporterConfig {
    /// Directories searched for the configuration file, in order: `/etc`, the
    /// home directory (if `HOME` is set), then the current directory.
    pub fn search_dirs() -> Vec<PathBuf> {
        let mut dirs = vec![PathBuf::from("/etc")];
        if let Some(home) = env::var_os("HOME") {
            dirs.push(PathBuf::from(home));
        }
        dirs.push(PathBuf::from("."));
        dirs
    }

    /// Load the first configuration file found in the default search directories.
    pub fn discover() -> Result<Self, ConfigError> {
        Self::discover_in(&Self::search_dirs())
    }

    /// Load the first configuration file found in `dirs`. Each directory is checked
    /// for every name in `CONFIG_FILE_NAMES` before moving on to the next one.
    pub fn discover_in(dirs: &[PathBuf]) -> Result<Self, ConfigError> {
        let candidates: Vec<PathBuf> = dirs
            .iter()
            .flat_map(|d| CONFIG_FILE_NAMES.iter().map(move |n| d.join(n)))
            .collect();

        if let Some(path) = candidates.iter().find(|p| p.is_file()) {
            return Self::load(path);
        }

        Err(ConfigError::NotFound(candidates))
    }

    /// Read, parse, and validate the configuration file at `path`. The format is
    /// picked from the file extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_owned(), e))?;
        let config = Self::parse(&contents, ConfigFormat::from_path(path))
            .map_err(|e| ConfigError::Parse(path.to_owned(), e))?;

        tracing::debug!(message = "loaded configuration", path = %path.display(), sensors = config.sensors.len());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a string without validating it.
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self, Box<dyn Error + Send + Sync + 'static>> {
        match format {
            ConfigFormat::Yaml => Ok(serde_yaml::from_str(contents)?),
            ConfigFormat::Json => Ok(serde_json::from_str(contents)?),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_port == 0 {
            return Err(ConfigError::Validation("listen_port must be non-zero".to_owned()));
        }

        if self.sensors.is_empty() {
            return Err(ConfigError::Validation("at least one sensor must be configured".to_owned()));
        }

        let mut names = HashSet::new();
        for sensor in &self.sensors {
            if sensor.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "sensor on GPIO{} has an empty name",
                    sensor.gpio_pin
                )));
            }

            if !names.insert(sensor.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "sensor name '{}' is used more than once",
                    sensor.name
                )));
            }

            if sensor.max_retries == 0 {
                return Err(ConfigError::Validation(format!(
                    "sensor '{}' must allow at least one read attempt",
                    sensor.name
                )));
            }
        }

        Ok(())
    }

    /// Identities of all configured sensors, in configuration order.
    pub fn identities(&self) -> Vec<SensorIdentity> {
        self.sensors.iter().map(SensorConfig::identity).collect()
    }
}

/// Parse a log level name, case insensitive. `fatal` and `panic` are accepted as
/// aliases for `error`.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_ascii_lowercase().as_str() {
        "fatal" | "panic" => Some(Level::ERROR),
        other => Level::from_str(other).ok(),
    }
}

#[cfg(test)]
mod test {
    use super::{parse_level, ConfigError, ConfigFormat, ExporterConfig, CONFIG_FILE_NAMES};
    use crate::sensor::{SensorIdentity, TemperatureUnit};
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use tracing::Level;

    const FULL: &str = r#"{
        "listen_port": 9999,
        "log_level": "debug",
        "sensors": [
            {"name": "kitchen", "gpio_pin": 4, "max_retries": 3, "temperature_unit": "celsius"},
            {"name": "garage", "gpio_pin": 17, "max_retries": 10, "temperature_unit": "fahrenheit"}
        ]
    }"#;

    const FULL_YAML: &str = "
listen_port: 9999
log_level: debug
sensors:
  - name: kitchen
    gpio_pin: 4
    max_retries: 3
    temperature_unit: celsius
  - name: garage
    gpio_pin: 17
    max_retries: 10
    temperature_unit: fahrenheit
";

    const SINGLE_SENSOR_YAML: &str = "
name: living_room
gpio_pin: 4
max_retries: 5
listen_port: 9999
log_level: info
temperature_unit: celsius
";

    fn parse(s: &str) -> ExporterConfig {
        serde_json::from_str(s).unwrap()
    }

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_full() {
        let config = parse(FULL);

        assert_eq!(9999, config.listen_port);
        assert_eq!("debug", config.log_level);
        assert_eq!(
            vec![
                SensorIdentity::new("kitchen", 4, TemperatureUnit::Celsius, 3),
                SensorIdentity::new("garage", 17, TemperatureUnit::Fahrenheit, 10),
            ],
            config.identities()
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml_matches_json() {
        let yaml = ExporterConfig::parse(FULL_YAML, ConfigFormat::Yaml).unwrap();
        let json = ExporterConfig::parse(FULL, ConfigFormat::Json).unwrap();

        assert_eq!(json, yaml);
    }

    #[test]
    fn test_parse_single_sensor_yaml() {
        let config = ExporterConfig::parse(SINGLE_SENSOR_YAML, ConfigFormat::Yaml).unwrap();

        assert_eq!(9999, config.listen_port);
        assert_eq!("info", config.log_level);
        assert_eq!(
            vec![SensorIdentity::new("living_room", 4, TemperatureUnit::Celsius, 5)],
            config.identities()
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_single_sensor_defaults() {
        let config = ExporterConfig::parse("name: porch\ngpio_pin: 22\n", ConfigFormat::Yaml).unwrap();

        assert_eq!(5, config.sensors[0].max_retries);
        assert_eq!(TemperatureUnit::Celsius, config.sensors[0].temperature_unit);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::Yaml, ConfigFormat::from_path(Path::new("/etc/dht-prometheus-exporter.yaml")));
        assert_eq!(ConfigFormat::Yaml, ConfigFormat::from_path(Path::new("dht-prometheus-exporter.yml")));
        assert_eq!(ConfigFormat::Json, ConfigFormat::from_path(Path::new("dht-exporter.JSON")));
        assert_eq!(ConfigFormat::Yaml, ConfigFormat::from_path(Path::new("config")));
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse(r#"{"sensors": [{"name": "porch", "gpio_pin": 22}]}"#);

        assert_eq!(8080, config.listen_port);
        assert_eq!("info", config.log_level);
        assert_eq!(5, config.sensors[0].max_retries);
        assert_eq!(TemperatureUnit::Celsius, config.sensors[0].temperature_unit);
    }

    #[test]
    fn test_parse_unknown_unit() {
        let res = serde_json::from_str::<ExporterConfig>(
            r#"{"sensors": [{"name": "porch", "gpio_pin": 22, "temperature_unit": "kelvin"}]}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_validate_no_sensors() {
        let config = parse(r#"{"sensors": []}"#);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let config = parse(
            r#"{"sensors": [{"name": "porch", "gpio_pin": 22}, {"name": "porch", "gpio_pin": 23}]}"#,
        );
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_empty_name() {
        let config = parse(r#"{"sensors": [{"name": " ", "gpio_pin": 22}]}"#);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_zero_retries() {
        let config = parse(r#"{"sensors": [{"name": "porch", "gpio_pin": 22, "max_retries": 0}]}"#);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_zero_port() {
        let config = parse(r#"{"listen_port": 0, "sensors": [{"name": "porch", "gpio_pin": 22}]}"#);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = ExporterConfig::load(file.path()).unwrap();
        assert_eq!(2, config.sensors.len());
    }

    #[test]
    fn test_load_yaml_file() {
        let file = yaml_file(SINGLE_SENSOR_YAML);

        let config = ExporterConfig::load(file.path()).unwrap();
        assert_eq!("living_room", config.sensors[0].name);
    }

    #[test]
    fn test_load_invalid_yaml() {
        let file = yaml_file("sensors: [name: porch\n");

        let res = ExporterConfig::load(file.path());
        assert!(matches!(res, Err(ConfigError::Parse(_, _))));
    }

    #[test]
    fn test_load_yaml_without_sensors() {
        let file = yaml_file("listen_port: 9999\n");

        let res = ExporterConfig::load(file.path());
        assert!(matches!(res, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(b"{not json").unwrap();

        let res = ExporterConfig::load(file.path());
        assert!(matches!(res, Err(ConfigError::Parse(_, _))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let res = ExporterConfig::load(&dir.path().join("missing.json"));

        assert!(matches!(res, Err(ConfigError::Io(_, _))));
    }

    #[test]
    fn test_discover_first_match() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let third = tempfile::tempdir().unwrap();

        fs::write(
            second.path().join("dht-exporter.json"),
            r#"{"sensors": [{"name": "second", "gpio_pin": 4}]}"#,
        )
        .unwrap();
        fs::write(
            third.path().join("dht-prometheus-exporter.yaml"),
            "name: third\ngpio_pin: 4\n",
        )
        .unwrap();

        let dirs = vec![first.path().to_owned(), second.path().to_owned(), third.path().to_owned()];
        let config = ExporterConfig::discover_in(&dirs).unwrap();

        assert_eq!("second", config.sensors[0].name);
    }

    #[test]
    fn test_discover_prefers_yaml_in_same_dir() {
        let dir = tempfile::tempdir().unwrap();

        fs::write(dir.path().join("dht-exporter.json"), r#"{"sensors": [{"name": "json", "gpio_pin": 4}]}"#).unwrap();
        fs::write(dir.path().join("dht-prometheus-exporter.yml"), "name: yaml\ngpio_pin: 4\n").unwrap();

        let config = ExporterConfig::discover_in(&[dir.path().to_owned()]).unwrap();
        assert_eq!("yaml", config.sensors[0].name);
    }

    #[test]
    fn test_discover_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let res = ExporterConfig::discover_in(&[dir.path().to_owned()]);

        match res {
            Err(ConfigError::NotFound(paths)) => {
                let expected: Vec<_> = CONFIG_FILE_NAMES.iter().map(|n| dir.path().join(n)).collect();
                assert_eq!(expected, paths);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(Some(Level::DEBUG), parse_level("debug"));
        assert_eq!(Some(Level::WARN), parse_level("WARN"));
        assert_eq!(Some(Level::ERROR), parse_level("fatal"));
        assert_eq!(None, parse_level("loud"));
    }
}
