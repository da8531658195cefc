//! Device identity resolution
//!
//! Before tracing starts, raw block devices are resolved to stable volume
//! identities (volume UUID plus mount point). The result is an immutable
//! catalog keyed by the identifier the tracing probe tags its events with,
//! so the dispatcher can look up identities lock-free while the probe runs.

pub mod diskutil;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;

/// A raw block device as reported by device enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub node: String,
    pub major: u32,
    pub minor: u32,
}

impl RawDevice {
    /// The identifier the tracing probe uses to tag events for this device.
    pub fn probe_id(&self) -> String {
        format!("{}-{}", self.major, self.minor)
    }
}

/// Volume metadata returned by the OS volume-info query.
#[derive(Debug, Clone, Default)]
pub struct VolumeInfo {
    pub disk_uuid: Option<String>,
    pub mount_point: Option<String>,
    pub device_node: Option<String>,
}

/// A fully resolved device: probe identifier plus stable volume identity.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub probe_id: String,
    pub volume_id: String,
    pub mount_point: String,
    pub device_node: String,
}

/// OS-level device queries, behind a trait so catalog construction can be
/// tested against a fake.
#[async_trait]
pub trait DeviceQuery {
    /// Enumerate raw block devices matching `glob`, already filtered down to
    /// mountable storage slices.
    async fn list_raw_devices(&self, glob: &str) -> Result<Vec<RawDevice>>;

    /// Query volume metadata for one device node.
    async fn volume_info(&self, node: &str) -> Result<VolumeInfo>;
}

/// Immutable mapping from probe identifier to volume identity.
///
/// Built once during startup and never mutated afterwards; lookups need no
/// locking.
#[derive(Debug, Default)]
pub struct DeviceCatalog {
    devices: HashMap<String, DeviceIdentity>,
}

impl DeviceCatalog {
    pub fn get(&self, probe_id: &str) -> Option<&DeviceIdentity> {
        self.devices.get(probe_id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.devices.values()
    }

    /// Pretty rendering of all retained devices for the startup log.
    pub fn render(&self) -> String {
        let mut devices: Vec<&DeviceIdentity> = self.devices.values().collect();
        devices.sort_by(|a, b| a.probe_id.cmp(&b.probe_id));
        serde_json::to_string_pretty(&devices).unwrap_or_else(|_| "[]".to_string())
    }
}

impl FromIterator<DeviceIdentity> for DeviceCatalog {
    fn from_iter<I: IntoIterator<Item = DeviceIdentity>>(iter: I) -> Self {
        Self {
            devices: iter
                .into_iter()
                .map(|identity| (identity.probe_id.clone(), identity))
                .collect(),
        }
    }
}

/// Build the device catalog: enumerate devices, resolve volume metadata for
/// each concurrently, and retain those with a volume UUID and mount point.
///
/// Fail-fast: if any single metadata query errors, the whole build fails and
/// no catalog is produced. Tracing must not start with a partial device map,
/// since that would silently drop events for real devices.
pub async fn build_catalog(query: &dyn DeviceQuery, glob: &str) -> Result<DeviceCatalog> {
    let raw = query.list_raw_devices(glob).await?;

    let infos =
        futures::future::try_join_all(raw.iter().map(|dev| query.volume_info(&dev.node))).await?;

    let mut devices = HashMap::with_capacity(raw.len());
    for (dev, info) in raw.iter().zip(infos) {
        let (uuid, mount) = match (info.disk_uuid, info.mount_point) {
            (Some(uuid), Some(mount)) if !uuid.is_empty() && !mount.is_empty() => (uuid, mount),
            // Unmounted or unidentifiable volumes cannot be tagged downstream
            _ => continue,
        };
        let identity = DeviceIdentity {
            probe_id: dev.probe_id(),
            volume_id: uuid,
            mount_point: mount,
            device_node: info.device_node.unwrap_or_else(|| dev.node.clone()),
        };
        devices.insert(identity.probe_id.clone(), identity);
    }

    Ok(DeviceCatalog { devices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CollectorError;

    struct FakeQuery {
        devices: Vec<RawDevice>,
        infos: HashMap<String, VolumeInfo>,
        fail_node: Option<String>,
    }

    #[async_trait]
    impl DeviceQuery for FakeQuery {
        async fn list_raw_devices(&self, _glob: &str) -> Result<Vec<RawDevice>> {
            Ok(self.devices.clone())
        }

        async fn volume_info(&self, node: &str) -> Result<VolumeInfo> {
            if self.fail_node.as_deref() == Some(node) {
                return Err(CollectorError::VolumeQuery {
                    device: node.to_string(),
                    reason: "query failed".to_string(),
                });
            }
            Ok(self.infos.get(node).cloned().unwrap_or_default())
        }
    }

    fn dev(node: &str, major: u32, minor: u32) -> RawDevice {
        RawDevice {
            node: node.to_string(),
            major,
            minor,
        }
    }

    fn info(uuid: Option<&str>, mount: Option<&str>) -> VolumeInfo {
        VolumeInfo {
            disk_uuid: uuid.map(str::to_string),
            mount_point: mount.map(str::to_string),
            device_node: None,
        }
    }

    #[tokio::test]
    async fn test_catalog_retains_only_mounted_identified_volumes() {
        let query = FakeQuery {
            devices: vec![
                dev("/dev/disk1s1", 1, 1),
                dev("/dev/disk1s2", 1, 2),
                dev("/dev/disk1s3", 1, 3),
            ],
            infos: HashMap::from([
                (
                    "/dev/disk1s1".to_string(),
                    info(Some("AAAA-1111"), Some("/")),
                ),
                // No mount point
                ("/dev/disk1s2".to_string(), info(Some("BBBB-2222"), None)),
                // No volume UUID
                (
                    "/dev/disk1s3".to_string(),
                    info(None, Some("/Volumes/Data")),
                ),
            ]),
            fail_node: None,
        };

        let catalog = build_catalog(&query, "/dev/disk*").await.unwrap();

        assert_eq!(catalog.len(), 1);
        let identity = catalog.get("1-1").expect("mounted volume retained");
        assert_eq!(identity.volume_id, "AAAA-1111");
        assert_eq!(identity.mount_point, "/");
        assert!(catalog.get("1-2").is_none());
        assert!(catalog.get("1-3").is_none());
    }

    #[tokio::test]
    async fn test_catalog_lookup_is_stable() {
        let query = FakeQuery {
            devices: vec![dev("/dev/disk1s1", 1, 2)],
            infos: HashMap::from([(
                "/dev/disk1s1".to_string(),
                info(Some("ABCD-1234"), Some("/Volumes/Data")),
            )]),
            fail_node: None,
        };

        let catalog = build_catalog(&query, "/dev/disk*").await.unwrap();

        let first = catalog.get("1-2").cloned().unwrap();
        let second = catalog.get("1-2").cloned().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.device_node, "/dev/disk1s1");
    }

    #[tokio::test]
    async fn test_one_failed_metadata_query_fails_the_build() {
        let query = FakeQuery {
            devices: vec![
                dev("/dev/disk1s1", 1, 1),
                dev("/dev/disk1s2", 1, 2),
                dev("/dev/disk1s3", 1, 3),
            ],
            infos: HashMap::from([
                (
                    "/dev/disk1s1".to_string(),
                    info(Some("AAAA-1111"), Some("/")),
                ),
                (
                    "/dev/disk1s3".to_string(),
                    info(Some("CCCC-3333"), Some("/Volumes/Data")),
                ),
            ]),
            fail_node: Some("/dev/disk1s2".to_string()),
        };

        let err = build_catalog(&query, "/dev/disk*").await.unwrap_err();
        assert!(matches!(err, CollectorError::VolumeQuery { .. }));
    }

    #[test]
    fn test_render_is_sorted_json() {
        let mut devices = HashMap::new();
        for identity in [
            DeviceIdentity {
                probe_id: "1-2".to_string(),
                volume_id: "ABCD-1234".to_string(),
                mount_point: "/Volumes/Data".to_string(),
                device_node: "/dev/disk1s2".to_string(),
            },
            DeviceIdentity {
                probe_id: "1-1".to_string(),
                volume_id: "AAAA-1111".to_string(),
                mount_point: "/".to_string(),
                device_node: "/dev/disk1s1".to_string(),
            },
        ] {
            devices.insert(identity.probe_id.clone(), identity);
        }
        let catalog = DeviceCatalog { devices };

        let rendered = catalog.render();
        let first = rendered.find("1-1").unwrap();
        let second = rendered.find("1-2").unwrap();
        assert!(first < second);
    }
}
