pub mod agent;
pub mod cli;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod probe;
pub mod sink;

pub use error::{CollectorError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
