use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fetchtask")]
#[command(about = "Download task orchestration service", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to config/fetchtask.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API, event consumer and schedulers
    Server(ServerArgs),
    /// Requeue DOWNLOADING and FAILED tasks once and exit
    Sweep,
    /// Execute every PENDING task once and exit
    Dispatch(DispatchArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct DispatchArgs {
    /// Worker pool size (overrides cron.dispatch_pending.concurrency_limit)
    #[arg(long)]
    pub concurrency: Option<usize>,
}
