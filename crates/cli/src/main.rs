//! `omni`: interactive OmniSharp client.
//!
//! Starts a server for the workspace (or an explicit target), then reads
//! requests and directives from stdin until EOF, `:quit` or Ctrl-C.

mod cli;
mod repl;
mod report;

use std::future::Future;
use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use omni_session::{
	AutoStartOutcome, LaunchTarget, Priority, RequestOptions, ServerConfig, SessionManager,
};
use repl::{HELP, ReplCommand};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	setup_tracing(cli.verbose);

	let config = load_config(&cli)?;
	tracing::info!(command = %config.command, root = %config.workspace_root.display(), "starting omni");

	let manager = SessionManager::new(config);
	let _report = manager.events().subscribe_all(|event| {
		if let Some(text) = report::describe(event) {
			eprintln!("{text}");
		}
	});

	let session = async {
		launch(&manager, cli.target).await;
		prompt(&manager).await
	};
	let result = until_interrupted(session, tokio::signal::ctrl_c()).await;
	manager.stop().await;
	result
}

/// Drives `session` to completion unless `interrupt` resolves first.
///
/// Covers startup and in-flight requests as well as the wait for input.
async fn until_interrupted<S, I>(session: S, interrupt: I) -> anyhow::Result<()>
where
	S: Future<Output = anyhow::Result<()>>,
	I: Future<Output = io::Result<()>>,
{
	tokio::select! {
		result = session => result,
		signal = interrupt => {
			signal.context("listening for Ctrl-C")?;
			tracing::info!("interrupted");
			Ok(())
		}
	}
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
	let mut config = match &cli.config {
		Some(path) => ServerConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => ServerConfig::default(),
	};
	if let Some(server) = &cli.server {
		config.command = server.clone();
	}
	if let Some(workspace) = &cli.workspace {
		config.workspace_root = workspace.clone();
	}
	if let Some(secs) = cli.timeout {
		config.request_timeout_secs = secs;
	}
	Ok(config)
}

/// Start failures are reported and leave the prompt usable for `:restart`.
async fn launch(manager: &SessionManager, target: Option<PathBuf>) {
	let result = match target {
		Some(path) => manager.start(LaunchTarget::from_path(path)).await,
		None => match manager.auto_start(None).await {
			Ok(AutoStartOutcome::NoTargets) => {
				eprintln!("no solution or C# project found under the workspace");
				Ok(())
			}
			Ok(_) => Ok(()),
			Err(error) => Err(error),
		},
	};
	if let Err(error) = result {
		tracing::error!(%error, "server did not start");
		eprintln!("error: {error}");
	}
}

async fn prompt(manager: &SessionManager) -> anyhow::Result<()> {
	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	while let Some(line) = lines.next_line().await.context("reading stdin")? {
		let command = match repl::parse_line(&line) {
			Ok(command) => command,
			Err(error) => {
				eprintln!("error: {error}");
				continue;
			}
		};

		match command {
			ReplCommand::Empty => {}
			ReplCommand::Request {
				command,
				arguments,
				high,
			} => {
				let priority = if high { Priority::High } else { Priority::Normal };
				let options = RequestOptions::default().priority(priority);
				match manager.request_value(&command, arguments, options).await {
					Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
					Err(error) => eprintln!("error: {error}"),
				}
			}
			ReplCommand::Restart(target) => {
				if let Err(error) = manager.restart(target.map(LaunchTarget::from_path)).await {
					eprintln!("error: {error}");
				}
			}
			ReplCommand::Stop => manager.stop().await,
			ReplCommand::Status => {
				let target = manager
					.current_target()
					.map_or_else(|| "none".to_owned(), |target| target.to_string());
				match manager.server_pid() {
					Some(pid) => eprintln!("{} ({target}, pid {pid})", manager.state()),
					None => eprintln!("{} ({target})", manager.state()),
				}
			}
			ReplCommand::Help => eprintln!("{HELP}"),
			ReplCommand::Quit => return Ok(()),
		}
	}
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	if let Some(log_dir) = std::env::var("OMNI_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("omni.{}.log", std::process::id()));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("omni_session=trace,omnisharp=debug,info")
				} else {
					EnvFilter::new("omni_session=debug,info")
				}
			});

			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry().with(filter).with(file_layer).init();

			tracing::info!(path = ?log_path, "tracing initialized");
			return;
		}
	}

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::new(if verbose { "omni_session=debug,info" } else { "warn" })
	});
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}
