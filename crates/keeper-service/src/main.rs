//! Main entry point for the keeper service.
//!
//! Loads the configuration, wires the engine and runs it once, or on a fixed
//! interval until interrupted.

use clap::Parser;
use keeper_config::Config;
use keeper_core::{KeeperBuilder, KeeperEngine, KeeperFactories};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use keeper_account::implementations::local::create_account;
use keeper_storage::implementations::file::create_storage as create_file_storage;
use keeper_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the keeper service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Repeat the run every N seconds instead of running once
	#[arg(long, env = "KEEPER_EVERY")]
	every: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(path).await?;
	tracing::info!("Loaded configuration [{}]", config.keeper.id);

	let engine = build_keeper(config).await?;

	match args.every {
		None => {
			tokio::select! {
				result = run(&engine) => result?,
				_ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
			}
		},
		Some(seconds) => {
			tracing::info!(every = seconds, "Running on interval");
			let engine = &engine;
			run_every(
				Duration::from_secs(seconds.max(1)),
				move || async move {
					// A failed run is retried on the next tick.
					if let Err(e) = run(engine).await {
						tracing::error!(error = %e, "Run failed");
					}
				},
				async {
					let _ = tokio::signal::ctrl_c().await;
				},
			)
			.await;
			tracing::info!("Interrupted");
		},
	}

	tracing::info!("Stopped keeper");
	Ok(())
}

async fn run(engine: &KeeperEngine) -> Result<(), keeper_core::EngineError> {
	let report = engine.run_once().await?;
	tracing::info!(
		run_id = %report.run_id,
		resources = report.resources.len(),
		succeeded = report.succeeded(),
		skipped = report.skipped(),
		failed = report.failed(),
		"Run complete"
	);
	Ok(())
}

/// Calls `run` on every tick of `period` until `shutdown` completes.
/// Shutdown also interrupts a run in progress.
async fn run_every<F, Fut, S>(period: Duration, mut run: F, shutdown: S)
where
	F: FnMut() -> Fut,
	Fut: Future<Output = ()>,
	S: Future,
{
	let mut interval = tokio::time::interval(period);
	tokio::pin!(shutdown);
	loop {
		tokio::select! {
			_ = interval.tick() => {},
			_ = &mut shutdown => break,
		}
		tokio::select! {
			_ = run() => {},
			_ = &mut shutdown => {
				tracing::warn!("Shutdown during a run, abandoning it");
				break;
			}
		}
	}
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
	($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
		let mut factories = std::collections::HashMap::new();
		$(
			factories.insert(
				$name.to_string(),
				$factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
			);
		)*
		factories
	}};
}

async fn build_keeper(config: Config) -> Result<KeeperEngine, Box<dyn std::error::Error>> {
	let builder = KeeperBuilder::new(config);

	let storage_factories = create_factory_map!(
		keeper_storage::StorageInterface,
		keeper_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	let account_factories = create_factory_map!(
		keeper_account::AccountInterface,
		keeper_account::AccountError,
		"local" => create_account,
	);

	let factories = KeeperFactories {
		storage_factories,
		account_factories,
	};

	Ok(builder.build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	#[tokio::test(start_paused = true)]
	async fn test_runs_on_every_tick_until_shutdown() {
		let runs = AtomicU32::new(0);
		let runs_ref = &runs;
		run_every(
			Duration::from_secs(10),
			move || async move {
				runs_ref.fetch_add(1, Ordering::SeqCst);
			},
			tokio::time::sleep(Duration::from_secs(25)),
		)
		.await;
		// Ticks at 0s, 10s and 20s.
		assert_eq!(runs.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_interrupts_a_run_in_progress() {
		let runs = AtomicU32::new(0);
		let runs_ref = &runs;
		run_every(
			Duration::from_secs(60),
			move || async move {
				runs_ref.fetch_add(1, Ordering::SeqCst);
				std::future::pending::<()>().await;
			},
			tokio::time::sleep(Duration::from_secs(5)),
		)
		.await;
		assert_eq!(runs.load(Ordering::SeqCst), 1);
	}
}
