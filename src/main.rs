mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use fetchtask::app::App;
use fetchtask::config::Config;
use fetchtask::observability::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    init_tracing(config.telemetry.log_format);

    match cli.command {
        Commands::Server(args) => {
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            App::build(config)?.run_server().await?;
        }
        Commands::Sweep => {
            let requeued = App::build(config)?.sweep_once()?;
            info!(requeued, "Recovery sweep finished");
        }
        Commands::Dispatch(args) => {
            if let Some(concurrency) = args.concurrency.filter(|n| *n > 0) {
                config.cron.dispatch_pending.concurrency_limit = concurrency;
            }
            let stats = App::build(config)?.dispatch_once().await?;
            info!(
                total = stats.total,
                completed = stats.completed,
                failed = stats.failed,
                "Batch dispatch finished"
            );
        }
    }

    Ok(())
}
