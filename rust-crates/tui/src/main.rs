use clap::Parser;
use color_eyre::eyre::Result;
use std::path::Path;
use time_tomb::{
    client,
    config::{
        AppConfig,
        Cli,
    },
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

/// The terminal owns stdout, so logs go to a daily file instead.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    let appender = rolling::daily(log_dir, "time-tomb.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _guard = init_tracing(&cli.log_dir);
    tracing::info!(network = ?cli.network, "starting time-tomb client");
    let config = AppConfig::from_cli(cli)?;
    client::run_app(config).await
}
