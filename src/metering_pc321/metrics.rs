use std::collections::BTreeMap;

use serde::ser::{Error as _, SerializeMap};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;
use thiserror::Error;

use super::decoder::RegisterReading;
use super::registers::PC321_REGISTERS;

#[derive(Error, Debug)]
#[error("Unable to encode metrics: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Fixed point with three decimals, never in exponent notation.
pub fn format_metric_value(value: f64) -> String {
    format!("{:.3}", value)
}

struct ThreeDecimals(f64);

impl Serialize for ThreeDecimals {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // NaN and infinity format to something that is not a JSON number and are rejected here
        let raw = RawValue::from_string(format_metric_value(self.0)).map_err(S::Error::custom)?;
        raw.serialize(serializer)
    }
}

/// Scaled metrics of one reading, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricMap {
    metrics: BTreeMap<&'static str, f64>,
}

impl MetricMap {
    pub fn new() -> Self {
        MetricMap { metrics: BTreeMap::new() }
    }

    pub fn insert(&mut self, name: &'static str, value: f64) {
        self.metrics.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.metrics.keys().copied()
    }

    pub fn to_json(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for MetricMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.metrics.len()))?;
        for (name, value) in self.metrics.iter() {
            map.serialize_entry(name, &ThreeDecimals(*value))?;
        }
        map.end()
    }
}

/// Applies the register table to a reading. Registers without a metric name are skipped.
pub fn rescale(reading: &RegisterReading) -> MetricMap {
    let mut metrics = MetricMap::new();

    for reg in PC321_REGISTERS.iter() {
        let Some(name) = reg.metric else { continue };
        if let Some(raw) = reading.get(reg.register) {
            metrics.insert(name, reg.scale(raw));
        }
    }

    metrics
}
