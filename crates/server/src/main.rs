//! `verity-ls`: the verity language server over stdio.
//!
//! stdout carries protocol frames exclusively; every diagnostic goes to
//! stderr through `tracing`.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use verity_lsp::Server;
use verity_rpc::Endpoint;
use verity_worker::{WorkerPool, default_pool_size};

#[derive(Debug, Parser)]
#[command(name = "verity-ls", version, about = "Language server for the verity test-automation language")]
struct Cli {
	/// Tracing filter, e.g. "verity_rpc=debug". Overrides RUST_LOG.
	#[arg(long)]
	log: Option<String>,

	/// Number of concurrent deferred handlers. Defaults to a size derived
	/// from the core count.
	#[arg(long)]
	workers: Option<usize>,

	/// Seconds a deferred handler may run before being reported as slow.
	#[arg(long, default_value_t = 8)]
	watchdog_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let filter = cli
		.log
		.map(EnvFilter::new)
		.unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();

	let workers = cli.workers.unwrap_or_else(default_pool_size);
	let (endpoint, _socket) = Endpoint::new(Server::new_router);
	let endpoint = endpoint
		.with_pool(WorkerPool::new(workers))
		.with_watchdog_threshold(Duration::from_secs(cli.watchdog_secs));

	info!(version = env!("CARGO_PKG_VERSION"), workers, "verity-ls starting");
	match endpoint.run_buffered(tokio::io::stdin(), tokio::io::stdout()).await {
		Ok(()) => {
			info!("verity-ls stopped");
			ExitCode::SUCCESS
		}
		Err(err) => {
			error!(error = %err, "verity-ls terminated");
			ExitCode::FAILURE
		}
	}
}
