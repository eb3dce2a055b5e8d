use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "omni")]
#[command(about = "Drive an OmniSharp server from the terminal")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Workspace to scan for solutions and projects
	#[arg(long, short = 'w', value_name = "DIR")]
	pub workspace: Option<PathBuf>,

	/// Solution, project or folder to launch instead of scanning
	#[arg(long, short = 't', value_name = "PATH")]
	pub target: Option<PathBuf>,

	/// Path of the OmniSharp executable
	#[arg(long, short = 's', value_name = "PATH")]
	pub server: Option<String>,

	/// TOML configuration file
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Default request timeout in seconds (0 disables it)
	#[arg(long, value_name = "SECS")]
	pub timeout: Option<u64>,

	/// Verbose logging
	#[arg(long, short = 'v')]
	pub verbose: bool,
}
