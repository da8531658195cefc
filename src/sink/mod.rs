//! Metrics sink abstraction
//!
//! The dispatcher writes resolved samples through the [`MetricsSink`] trait;
//! the production implementation is the InfluxDB client in [`influx`], tests
//! substitute a recording fake.

pub mod influx;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::Result;

/// A resolved time-series sample, ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub measurement: &'static str,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, i64>,
    /// Wall-clock at dispatch, nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Write one sample. Failures are the caller's to log; the sink does not
    /// retry or buffer.
    async fn write(&self, sample: &Sample) -> Result<()>;
}
