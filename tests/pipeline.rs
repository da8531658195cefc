//! Dispatcher pipeline tests against a fake catalog and a recording sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use disklatency::device::{DeviceCatalog, DeviceIdentity};
use disklatency::dispatch::{EventDispatcher, RecordFormat};
use disklatency::error::{CollectorError, Result};
use disklatency::sink::{MetricsSink, Sample};

#[derive(Default)]
struct RecordingSink {
    samples: Mutex<Vec<Sample>>,
    fail_next: AtomicBool,
}

impl RecordingSink {
    async fn samples(&self) -> Vec<Sample> {
        self.samples.lock().await.clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn write(&self, sample: &Sample) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CollectorError::Sink("connection refused".to_string()));
        }
        self.samples.lock().await.push(sample.clone());
        Ok(())
    }
}

fn catalog() -> Arc<DeviceCatalog> {
    Arc::new(DeviceCatalog::from_iter([DeviceIdentity {
        probe_id: "1-2".to_string(),
        volume_id: "ABCD-1234".to_string(),
        mount_point: "/Volumes/Data".to_string(),
        device_node: "/dev/disk1s2".to_string(),
    }]))
}

fn dispatcher(sink: Arc<RecordingSink>, format: RecordFormat) -> EventDispatcher {
    EventDispatcher::new(catalog(), sink, format)
}

#[tokio::test]
async fn test_known_device_reaches_the_sink() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = dispatcher(Arc::clone(&sink), RecordFormat::Composite);

    let write = dispatcher.dispatch("1-2\t1500").expect("record resolved");
    write.await.unwrap();

    let samples = sink.samples().await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].measurement, "disk_latency");
    assert_eq!(samples[0].tags["disk"], "ABCD-1234");
    assert_eq!(samples[0].fields["io_delta"], 1500);
    assert!(samples[0].timestamp_ns > 0);
}

#[tokio::test]
async fn test_major_minor_format_composes_the_identifier() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = dispatcher(Arc::clone(&sink), RecordFormat::MajorMinor);

    let write = dispatcher.dispatch("1\t2\t1500").expect("record resolved");
    write.await.unwrap();

    let samples = sink.samples().await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].tags["disk"], "ABCD-1234");
}

#[tokio::test]
async fn test_unknown_device_writes_nothing() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = dispatcher(Arc::clone(&sink), RecordFormat::Composite);

    assert!(dispatcher.dispatch("9-9\t200").is_none());

    assert!(sink.samples().await.is_empty());
    assert_eq!(dispatcher.stats().unresolved.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_malformed_record_is_dropped_and_counted() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = dispatcher(Arc::clone(&sink), RecordFormat::Composite);

    assert!(dispatcher.dispatch("1-2\tfast").is_none());
    assert!(dispatcher.dispatch("no tabs at all").is_none());

    assert!(sink.samples().await.is_empty());
    assert_eq!(dispatcher.stats().malformed.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_sink_failure_does_not_stop_the_pipeline() {
    let sink = Arc::new(RecordingSink::default());
    sink.fail_next.store(true, Ordering::SeqCst);
    let dispatcher = dispatcher(Arc::clone(&sink), RecordFormat::Composite);

    // First write fails and is dropped without retry
    let first = dispatcher.dispatch("1-2\t100").expect("record resolved");
    first.await.unwrap();
    assert!(sink.samples().await.is_empty());
    assert_eq!(dispatcher.stats().write_errors.load(Ordering::Relaxed), 1);

    // The next record goes through untouched
    let second = dispatcher.dispatch("1-2\t200").expect("record resolved");
    second.await.unwrap();

    let samples = sink.samples().await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].fields["io_delta"], 200);
}
