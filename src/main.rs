use clap::Parser;
use disklatency::agent::{self, AgentConfig};
use disklatency::cli::Cli;
use disklatency::sink::influx::InfluxConfig;
use std::process;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Starting disklatency v{}", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig {
        devices: cli.devices,
        probe: cli.probe,
        format: cli.format.into(),
        influx: InfluxConfig {
            url: cli.influx_url,
            database: cli.influx_db,
            username: cli.influx_username,
            password: cli.influx_password,
        },
        uid: cli.uid,
        gid: cli.gid,
    };

    if let Err(e) = agent::run(config).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
