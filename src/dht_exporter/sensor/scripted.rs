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

use crate::sensor::core::{SensorError, SensorErrorKind, TemperatureUnit};
use crate::sensor::reader::{Sample, SensorIdentity, SensorReader};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of one scripted read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Ok(Sample),
    Err(SensorErrorKind),
}

/// `SensorReader` that replays a script of outcomes instead of talking to hardware.
///
/// Outcomes are returned in order. Once the script has a single outcome left it
/// is repeated for every following read.
#[derive(Debug)]
pub struct ScriptedReader {
    identity: SensorIdentity,
    script: VecDeque<Outcome>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedReader {
    pub fn new<I>(identity: SensorIdentity, script: I) -> Self
    where
        I: IntoIterator<Item = Outcome>,
    {
        Self {
            identity,
            script: script.into_iter().collect(),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reader that always returns the given humidity and temperature.
    pub fn succeeding(identity: SensorIdentity, humidity: f64, temperature: f64) -> Self {
        Self::new(identity, [Outcome::Ok(Sample::new(humidity, temperature))])
    }

    /// Reader whose every read fails with the given kind of error.
    pub fn failing(identity: SensorIdentity, kind: SensorErrorKind) -> Self {
        Self::new(identity, [Outcome::Err(kind)])
    }

    /// Shared count of reads performed, still usable after the reader has been
    /// handed to a collector.
    pub fn reads(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    fn next_outcome(&mut self) -> Option<Outcome> {
        if self.script.len() > 1 {
            self.script.pop_front()
        } else {
            self.script.front().copied()
        }
    }
}

impl SensorReader for ScriptedReader {
    fn read_data(&mut self) -> Result<Sample, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        match self.next_outcome() {
            Some(Outcome::Ok(sample)) => Ok(sample),
            Some(Outcome::Err(kind)) => {
                let err = SensorError::Retries(
                    self.identity.max_retries.max(1),
                    Box::new(SensorError::KindMsg(kind, "scripted read failure")),
                );
                tracing::error!(message = "failed to read sensor data", sensor = %self.identity.name, error = %err);
                Err(err)
            }
            None => Err(SensorError::KindMsg(SensorErrorKind::ReadTimeout, "script is empty")),
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
