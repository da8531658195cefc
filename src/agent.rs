//! Top-level pipeline wiring
//!
//! Startup order matters: the device catalog must be complete before the
//! probe is spawned, because the dispatcher cannot resolve any event
//! without it, and the sink is pinged before tracing starts so connection
//! misconfiguration fails fast.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};

use crate::device::{build_catalog, diskutil::DiskutilQuery};
use crate::dispatch::{EventDispatcher, RecordFormat};
use crate::probe::{ProbeEvent, ProbeSupervisor};
use crate::sink::influx::{InfluxConfig, InfluxSink};
use crate::Result;

pub struct AgentConfig {
    pub devices: String,
    pub probe: PathBuf,
    pub format: RecordFormat,
    pub influx: InfluxConfig,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Run the collector until the probe exits or a shutdown signal arrives.
///
/// Fatal setup errors (enumeration, sink, probe spawn) are returned to the
/// caller; `main` owns the mapping to exit codes.
pub async fn run(config: AgentConfig) -> Result<()> {
    info!("Resolving devices matching {}", config.devices);
    let catalog = Arc::new(build_catalog(&DiskutilQuery, &config.devices).await?);
    info!(
        "Resolved {} mounted volumes:\n{}",
        catalog.len(),
        indent(&catalog.render(), 7)
    );

    info!("Connecting to InfluxDB at {}", config.influx.url);
    let sink = InfluxSink::new(config.influx)?;
    sink.ping().await?;

    info!("Starting tracing probe {}", config.probe.display());
    let mut probe = ProbeSupervisor::spawn(&config.probe)?;

    // The probe needed elevated privileges to attach to the kernel; the
    // long-running network-facing part of the process does not.
    drop_privileges(config.gid, config.uid)?;

    let dispatcher = EventDispatcher::new(catalog, Arc::new(sink), config.format);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            event = probe.next_event() => match event {
                Some(ProbeEvent::Record(line)) => {
                    dispatcher.dispatch(&line);
                }
                Some(ProbeEvent::Diagnostic(line)) => {
                    warn!("Probe: {}", line);
                }
                Some(ProbeEvent::Exited(code)) => {
                    // No restart here; service supervision is external.
                    // Keep draining until the channel closes so records
                    // framed before the exit are still dispatched.
                    match code {
                        Some(0) => info!("Probe exited"),
                        Some(code) => error!("Probe exited with code {}", code),
                        None => error!("Probe killed by signal"),
                    }
                }
                None => break,
            }
        }
    }

    let stats = dispatcher.stats();
    info!(
        "Collector stopping: {} records, {} malformed, {} unresolved, {} write errors",
        stats.records.load(Ordering::Relaxed),
        stats.malformed.load(Ordering::Relaxed),
        stats.unresolved.load(Ordering::Relaxed),
        stats.write_errors.load(Ordering::Relaxed),
    );
    Ok(())
}

#[cfg(unix)]
fn drop_privileges(gid: Option<u32>, uid: Option<u32>) -> Result<()> {
    use crate::CollectorError;
    use nix::unistd::{setgid, setuid, Gid, Uid};

    // setgid must come first: after setuid the process may no longer be
    // allowed to change its group.
    if let Some(gid) = gid {
        setgid(Gid::from_raw(gid))
            .map_err(|e| CollectorError::PrivilegeDrop(format!("setgid({}): {}", gid, e)))?;
        info!("Dropped group privileges to gid {}", gid);
    }
    if let Some(uid) = uid {
        setuid(Uid::from_raw(uid))
            .map_err(|e| CollectorError::PrivilegeDrop(format!("setuid({}): {}", uid, e)))?;
        info!("Dropped user privileges to uid {}", uid);
    }
    Ok(())
}

#[cfg(not(unix))]
fn drop_privileges(gid: Option<u32>, uid: Option<u32>) -> Result<()> {
    use crate::CollectorError;

    if gid.is_some() || uid.is_some() {
        return Err(CollectorError::PrivilegeDrop(
            "privilege dropping is only supported on unix".to_string(),
        ));
    }
    Ok(())
}

fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}
