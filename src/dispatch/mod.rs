//! Event dispatch: the per-record hot path
//!
//! Each framed probe record is parsed, resolved against the device catalog
//! and forwarded to the metrics sink. Every failure here is per-record:
//! malformed input, unknown devices and sink errors are logged and dropped,
//! and the pipeline moves on to the next record.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::device::DeviceCatalog;
use crate::sink::{MetricsSink, Sample};

pub const MEASUREMENT: &str = "disk_latency";

/// Probe record layout. Fixed per deployment by configuration, never
/// inferred from the records themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// `probeId \t latencyMicros`
    Composite,
    /// `major \t minor \t latencyMicros`; the identifier is the two leading
    /// fields joined with `-`.
    MajorMinor,
}

impl RecordFormat {
    fn field_count(self) -> usize {
        match self {
            RecordFormat::Composite => 2,
            RecordFormat::MajorMinor => 3,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("expected {expected} tab-separated fields, got {got}")]
    FieldCount { expected: usize, got: usize },
    #[error("non-numeric latency field: {0:?}")]
    Latency(String),
}

/// A parsed but not yet resolved probe record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub probe_id: String,
    pub latency_micros: i64,
}

/// Parse one framed line according to the configured record format.
pub fn parse_record(line: &str, format: RecordFormat) -> Result<RawRecord, RecordError> {
    let fields: Vec<&str> = line.split('\t').collect();
    let expected = format.field_count();
    if fields.len() != expected {
        return Err(RecordError::FieldCount {
            expected,
            got: fields.len(),
        });
    }

    let (probe_id, latency) = match format {
        RecordFormat::Composite => (fields[0].to_string(), fields[1]),
        RecordFormat::MajorMinor => (format!("{}-{}", fields[0], fields[1]), fields[2]),
    };

    let latency_micros = latency
        .trim()
        .parse()
        .map_err(|_| RecordError::Latency(latency.to_string()))?;

    Ok(RawRecord {
        probe_id,
        latency_micros,
    })
}

/// Drop counters, exposed for operational visibility.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub records: AtomicU64,
    pub malformed: AtomicU64,
    pub unresolved: AtomicU64,
    pub write_errors: AtomicU64,
}

/// Resolves records against the immutable catalog and forwards samples to
/// the sink.
pub struct EventDispatcher {
    catalog: Arc<DeviceCatalog>,
    sink: Arc<dyn MetricsSink>,
    format: RecordFormat,
    stats: Arc<DispatchStats>,
}

impl EventDispatcher {
    pub fn new(
        catalog: Arc<DeviceCatalog>,
        sink: Arc<dyn MetricsSink>,
        format: RecordFormat,
    ) -> Self {
        Self {
            catalog,
            sink,
            format,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Handle one framed record line.
    ///
    /// The sink write is spawned fire-and-forget so a slow or hung sink can
    /// never stall probe-stream draining; the returned handle completes when
    /// the write does. Dropped records return `None`.
    pub fn dispatch(&self, line: &str) -> Option<JoinHandle<()>> {
        self.stats.records.fetch_add(1, Ordering::Relaxed);

        let record = match parse_record(line, self.format) {
            Ok(record) => record,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("Malformed record {:?}: {}", line, e);
                return None;
            }
        };

        let Some(identity) = self.catalog.get(&record.probe_id) else {
            self.stats.unresolved.fetch_add(1, Ordering::Relaxed);
            warn!("Unknown disk: {}", record.probe_id);
            return None;
        };

        let sample = Sample {
            measurement: MEASUREMENT,
            tags: BTreeMap::from([("disk".to_string(), identity.volume_id.clone())]),
            fields: BTreeMap::from([("io_delta".to_string(), record.latency_micros)]),
            // The probe emits no absolute time; samples are stamped at
            // dispatch.
            timestamp_ns: now_nanos(),
        };

        let sink = Arc::clone(&self.sink);
        let stats = Arc::clone(&self.stats);
        Some(tokio::spawn(async move {
            if let Err(e) = sink.write(&sample).await {
                stats.write_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Sink write failed, sample dropped: {}", e);
            }
        }))
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
