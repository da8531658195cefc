use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Volume metadata query failed for {device}: {reason}")]
    VolumeQuery { device: String, reason: String },

    #[error("Failed to spawn tracing probe {path}: {source}")]
    ProbeSpawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Metrics sink error: {0}")]
    Sink(String),

    #[error("Failed to drop privileges: {0}")]
    PrivilegeDrop(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CollectorError>;
