use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::dispatch::RecordFormat;

#[derive(Parser, Debug)]
#[command(name = "disklatency")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Streams per-I/O disk latency events from a kernel tracing probe into InfluxDB", long_about = None)]
pub struct Cli {
    #[arg(
        long,
        default_value = "/dev/disk*",
        help = "Glob of raw block device nodes to resolve"
    )]
    pub devices: String,

    #[arg(
        long,
        default_value = "disklatency.d",
        help = "Path to the tracing probe executable"
    )]
    pub probe: PathBuf,

    #[arg(
        long,
        value_enum,
        default_value_t = RecordFormatArg::Composite,
        help = "Probe record layout: a single composite identifier, or separate major/minor fields"
    )]
    pub format: RecordFormatArg,

    #[arg(
        long,
        default_value = "http://localhost:8086",
        help = "InfluxDB server URL"
    )]
    pub influx_url: String,

    #[arg(long, default_value = "local", help = "InfluxDB database name")]
    pub influx_db: String,

    #[arg(long, default_value = "local", help = "InfluxDB username")]
    pub influx_username: String,

    #[arg(long, default_value = "local", help = "InfluxDB password")]
    pub influx_password: String,

    #[arg(
        short,
        long,
        help = "Drop to this UID after the probe is spawned"
    )]
    pub uid: Option<u32>,

    #[arg(
        short,
        long,
        help = "Drop to this GID after the probe is spawned"
    )]
    pub gid: Option<u32>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordFormatArg {
    /// One identifier field: `maj-min\tlatency`
    Composite,
    /// Two identifier fields: `maj\tmin\tlatency`
    MajorMinor,
}

impl From<RecordFormatArg> for RecordFormat {
    fn from(arg: RecordFormatArg) -> Self {
        match arg {
            RecordFormatArg::Composite => RecordFormat::Composite,
            RecordFormatArg::MajorMinor => RecordFormat::MajorMinor,
        }
    }
}
