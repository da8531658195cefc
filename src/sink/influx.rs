//! InfluxDB 1.x HTTP sink: samples are posted as line protocol to `/write`.

use async_trait::async_trait;

use super::{MetricsSink, Sample};
use crate::{CollectorError, Result};

/// Connection parameters for the InfluxDB HTTP API.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    /// Base server URL, e.g. `http://localhost:8086`.
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

pub struct InfluxSink {
    client: reqwest::Client,
    config: InfluxConfig,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CollectorError::Sink(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Startup connectivity check, so a misconfigured sink fails before the
    /// probe is ever launched.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/ping", self.config.url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CollectorError::Sink(format!("ping failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CollectorError::Sink(format!(
                "ping returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn write(&self, sample: &Sample) -> Result<()> {
        let url = format!("{}/write", self.config.url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .query(&[("db", self.config.database.as_str())])
            .basic_auth(&self.config.username, Some(&self.config.password))
            .body(encode_line(sample))
            .send()
            .await
            .map_err(|e| CollectorError::Sink(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::Sink(format!(
                "write rejected with {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(())
    }
}

/// Encode one sample as an InfluxDB line-protocol line:
/// `measurement,tag=value field=123i timestamp_ns`.
fn encode_line(sample: &Sample) -> String {
    let mut line = escape_measurement(sample.measurement);
    for (key, value) in &sample.tags {
        line.push(',');
        line.push_str(&escape_tag(key));
        line.push('=');
        line.push_str(&escape_tag(value));
    }
    line.push(' ');
    let mut first = true;
    for (key, value) in &sample.fields {
        if !first {
            line.push(',');
        }
        first = false;
        line.push_str(&escape_tag(key));
        line.push('=');
        line.push_str(&format!("{}i", value));
    }
    line.push(' ');
    line.push_str(&sample.timestamp_ns.to_string());
    line
}

/// Tag keys, tag values and field keys escape commas, equals and spaces.
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Measurement names escape commas and spaces only.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> Sample {
        Sample {
            measurement: "disk_latency",
            tags: BTreeMap::from([("disk".to_string(), "ABCD-1234".to_string())]),
            fields: BTreeMap::from([("io_delta".to_string(), 1500)]),
            timestamp_ns: 1_700_000_000_000_000_000,
        }
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(
            encode_line(&sample()),
            "disk_latency,disk=ABCD-1234 io_delta=1500i 1700000000000000000"
        );
    }

    #[test]
    fn test_encode_line_escapes_tag_values() {
        let mut sample = sample();
        sample
            .tags
            .insert("disk".to_string(), "has space,and=more".to_string());
        assert_eq!(
            encode_line(&sample),
            "disk_latency,disk=has\\ space\\,and\\=more io_delta=1500i 1700000000000000000"
        );
    }

    #[test]
    fn test_encode_line_multiple_fields_are_sorted() {
        let mut sample = sample();
        sample.fields.insert("queue_depth".to_string(), 4);
        assert_eq!(
            encode_line(&sample),
            "disk_latency,disk=ABCD-1234 io_delta=1500i,queue_depth=4i 1700000000000000000"
        );
    }
}
