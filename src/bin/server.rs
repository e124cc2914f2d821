//! CLI entry point: parse flags, resolve configuration, stand up
//! `tracing`, then hand off to the listener.

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use memtftpd::config::{Cli, LogFormat, ServerConfig};
use memtftpd::server;
use memtftpd::store::BlobStore;

/// When `op_log_path` is set, both ordinary diagnostic logs and the
/// Operation Logger's packet-level audit events are written there
/// instead of stdout, rather than to a second sink.
fn init_tracing(
    log_level: &str,
    format: LogFormat,
    op_log_path: Option<&std::path::Path>,
) -> anyhow::Result<WorkerGuard> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match op_log_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);
    if format == LogFormat::Json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.init_config {
        ServerConfig::write_default(path)?;
        println!("wrote default configuration to {}", path.display());
        return Ok(());
    }

    if cli.check_config {
        cli.resolve()?;
        println!("ok");
        return Ok(());
    }

    let config = cli.resolve()?;
    let _tracing_guard = init_tracing(
        &config.log_level,
        config.log_format,
        config.op_log_path.as_deref(),
    )?;

    let store = BlobStore::new();
    server::run(config, store).await?;
    Ok(())
}
