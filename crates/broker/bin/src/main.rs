//! Form broker binary.
//!
//! The broker runs as a daemon process and:
//! - rehydrates the form registry from its durable store
//! - applies lifecycle events (provider removal, host death, data resets)
//! - prints diagnostic dumps of the persisted registry

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use form_broker::services::lifecycle::{LifecycleHandle, LifecycleService};
use form_broker::{Collaborators, FormRegistry, LmdbStorage, RegistryConfig};
use form_broker_proto::{FormId, LifecycleEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Broker command line arguments.
#[derive(Parser, Debug)]
#[command(name = "form-broker")]
#[command(about = "Form registry and lifecycle broker")]
struct Args {
	/// Configuration file (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Store directory, overrides `storage.path`
	#[arg(long, value_name = "PATH")]
	db: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the broker until interrupted (default)
	Serve {
		/// Read JSON lifecycle events from stdin, one per line; EOF stops the broker
		#[arg(long)]
		events_stdin: bool,
	},
	/// Print the persisted registry as JSON
	Dump {
		/// Only forms of this provider bundle
		#[arg(long, value_name = "BUNDLE", conflicts_with = "form_id")]
		bundle: Option<String>,

		/// A single form id
		#[arg(long = "id", value_name = "ID")]
		form_id: Option<u64>,
	},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	info!("starting form-broker");

	let mut config = match &args.config {
		Some(path) => RegistryConfig::load(path)?,
		None => RegistryConfig::default(),
	};
	if let Some(db) = args.db {
		config.storage.path = Some(db);
	}

	let db_path = config.db_path();
	info!(path = %db_path.display(), "opening form store");
	let storage = Arc::new(LmdbStorage::open(&db_path, config.storage.map_size_mb)?);
	let registry = Arc::new(FormRegistry::open(
		config.quota.clone(),
		storage,
		Collaborators::detached(),
	)?);

	match args.command.unwrap_or(Command::Serve {
		events_stdin: false,
	}) {
		Command::Serve { events_stdin } => serve(registry, &config, events_stdin).await,
		Command::Dump { bundle, form_id } => dump(&registry, bundle, form_id),
	}
}

async fn serve(
	registry: Arc<FormRegistry>,
	config: &RegistryConfig,
	events_stdin: bool,
) -> Result<(), Box<dyn std::error::Error>> {
	let shutdown = CancellationToken::new();
	let lifecycle = LifecycleService::start(
		registry,
		config.lifecycle.channel_capacity,
		shutdown.clone(),
	);

	if events_stdin {
		tokio::spawn(read_events(lifecycle, shutdown.clone()));
	}

	info!("form broker running");
	tokio::select! {
		res = tokio::signal::ctrl_c() => {
			res?;
			info!("interrupt received, shutting down");
		}
		_ = shutdown.cancelled() => {}
	}
	shutdown.cancel();

	Ok(())
}

async fn read_events(lifecycle: LifecycleHandle, shutdown: CancellationToken) {
	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	loop {
		let line = tokio::select! {
			_ = shutdown.cancelled() => return,
			line = lines.next_line() => line,
		};
		match line {
			Ok(Some(line)) => {
				let line = line.trim();
				if line.is_empty() {
					continue;
				}
				match serde_json::from_str::<LifecycleEvent>(line) {
					Ok(event) => {
						if !lifecycle.send(event).await {
							return;
						}
					}
					Err(err) => warn!(error = %err, "ignoring malformed lifecycle event"),
				}
			}
			Ok(None) => {
				lifecycle.barrier().await;
				info!("event stream closed");
				break;
			}
			Err(err) => {
				error!(error = %err, "failed to read lifecycle events");
				break;
			}
		}
	}
	shutdown.cancel();
}

fn dump(
	registry: &FormRegistry,
	bundle: Option<String>,
	form_id: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
	let out = match (form_id, bundle) {
		(Some(id), _) => serde_json::to_string_pretty(&registry.dump_by_id(FormId(id))?)?,
		(None, Some(bundle)) => serde_json::to_string_pretty(&registry.dump_by_bundle(&bundle))?,
		(None, None) => serde_json::to_string_pretty(&registry.dump_all())?,
	};
	println!("{out}");
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	if let Some(log_dir) = std::env::var("FORM_BROKER_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let pid = std::process::id();
		let log_path = log_dir.join(format!("form-broker.{}.log", pid));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("form_broker=trace,debug")
				} else {
					EnvFilter::new("form_broker=debug,info")
				}
			});

			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry()
				.with(filter)
				.with(file_layer)
				.init();

			tracing::info!(path = ?log_path, "broker tracing initialized");
			return;
		}
	}

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::new(if verbose { "debug" } else { "info" })
	});
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}
