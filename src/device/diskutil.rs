//! macOS device queries: `stat` for enumeration, `diskutil` for volume info.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{DeviceQuery, RawDevice, VolumeInfo};
use crate::{CollectorError, Result};

/// Real device queries backed by `/usr/bin/stat` and `diskutil`.
#[derive(Debug, Default)]
pub struct DiskutilQuery;

#[async_trait]
impl DeviceQuery for DiskutilQuery {
    async fn list_raw_devices(&self, glob: &str) -> Result<Vec<RawDevice>> {
        // The glob is expanded by the shell, as `stat` takes literal paths.
        let command = format!("stat -f \"%Hr-%Lr%t%N\" {}", glob);
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await
            .map_err(|e| CollectorError::Enumeration(e.to_string()))?;

        if !output.status.success() {
            return Err(CollectorError::Enumeration(format!(
                "stat exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_stat_output(&stdout)
    }

    async fn volume_info(&self, node: &str) -> Result<VolumeInfo> {
        let output = Command::new("diskutil")
            .args(["info", "-plist", node])
            .output()
            .await
            .map_err(|e| CollectorError::VolumeQuery {
                device: node.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CollectorError::VolumeQuery {
                device: node.to_string(),
                reason: format!(
                    "diskutil exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let info: DiskutilInfo =
            plist::from_bytes(&output.stdout).map_err(|e| CollectorError::VolumeQuery {
                device: node.to_string(),
                reason: format!("unparseable plist: {}", e),
            })?;

        Ok(VolumeInfo {
            disk_uuid: info.disk_uuid,
            mount_point: info.mount_point,
            device_node: info.device_node,
        })
    }
}

/// The subset of `diskutil info -plist` output the catalog needs.
#[derive(Debug, Deserialize)]
struct DiskutilInfo {
    #[serde(rename = "DiskUUID", default)]
    disk_uuid: Option<String>,
    #[serde(rename = "MountPoint", default)]
    mount_point: Option<String>,
    #[serde(rename = "DeviceNode", default)]
    device_node: Option<String>,
}

/// Parse `stat -f "%Hr-%Lr%t%N"` output: one `major-minor\tnode` line per
/// device. Nodes that are not storage slices are dropped here, before any
/// volume query is issued.
fn parse_stat_output(stdout: &str) -> Result<Vec<RawDevice>> {
    let mut devices = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (id, node) = line
            .split_once('\t')
            .ok_or_else(|| CollectorError::Enumeration(format!("malformed stat line: {}", line)))?;
        let (major, minor) = id.split_once('-').ok_or_else(|| {
            CollectorError::Enumeration(format!("malformed device numbers: {}", id))
        })?;
        let major = major
            .parse()
            .map_err(|_| CollectorError::Enumeration(format!("bad major number: {}", id)))?;
        let minor = minor
            .parse()
            .map_err(|_| CollectorError::Enumeration(format!("bad minor number: {}", id)))?;

        if !is_storage_slice(node) {
            continue;
        }
        devices.push(RawDevice {
            node: node.to_string(),
            major,
            minor,
        });
    }
    Ok(devices)
}

/// True for device nodes with a trailing slice suffix (`...s1`, `...s12`).
/// Whole-disk nodes and pseudo-devices cannot carry a mountable volume.
fn is_storage_slice(node: &str) -> bool {
    match node.rfind('s') {
        Some(pos) => {
            let suffix = &node[pos + 1..];
            !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
