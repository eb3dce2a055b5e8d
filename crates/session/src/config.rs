//! Configuration for launching and talking to the analysis server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::launcher::LaunchSpec;
use crate::target::LaunchTarget;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),
}

/// Server launch and session settings.
///
/// Every field has a default, so a TOML file only needs the keys it overrides:
///
/// ```toml
/// command = "/opt/omnisharp/OmniSharp"
/// workspace_root = "/home/user/src/app"
/// request_timeout_secs = 30
///
/// [env]
/// DOTNET_CLI_TELEMETRY_OPTOUT = "1"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	/// Resolved path of the server executable.
	pub command: String,
	/// Extra arguments appended after the standard ones.
	pub args: Vec<String>,
	/// Environment variables to set.
	pub env: HashMap<String, String>,
	/// Workspace scanned by [`crate::SessionManager::auto_start`].
	pub workspace_root: PathBuf,
	/// Value passed to `--loglevel`.
	pub log_level: String,
	/// Default per-request timeout in seconds; 0 disables it.
	pub request_timeout_secs: u64,
	/// Time allowed between spawn and the readiness event; 0 disables it.
	pub startup_timeout_secs: u64,
	/// Grace period for the process to exit after being killed.
	pub stop_timeout_secs: u64,
	/// Directory depth searched for launch targets.
	pub target_search_depth: usize,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			command: String::from("OmniSharp"),
			args: Vec::new(),
			env: HashMap::new(),
			workspace_root: PathBuf::from("."),
			log_level: String::from("information"),
			request_timeout_secs: 0,
			startup_timeout_secs: 60,
			stop_timeout_secs: 2,
			target_search_depth: 5,
		}
	}
}

impl ServerConfig {
	/// Create a configuration for `command` serving `workspace_root`.
	pub fn new(command: impl Into<String>, workspace_root: impl Into<PathBuf>) -> Self {
		Self {
			command: command.into(),
			workspace_root: workspace_root.into(),
			..Self::default()
		}
	}

	/// Parse a configuration from TOML text.
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(text)?)
	}

	/// Read and parse a TOML configuration file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&text)
	}

	/// Add command line arguments.
	pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	/// Add environment variables.
	pub fn env(
		mut self,
		env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
	) -> Self {
		self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
		self
	}

	/// Set the default request timeout.
	pub fn timeout(mut self, secs: u64) -> Self {
		self.request_timeout_secs = secs;
		self
	}

	/// Set the startup timeout.
	pub fn startup_timeout(mut self, secs: u64) -> Self {
		self.startup_timeout_secs = secs;
		self
	}

	/// Set the server log level.
	pub fn log_level(mut self, level: impl Into<String>) -> Self {
		self.log_level = level.into();
		self
	}

	/// Default request timeout, `None` when disabled.
	pub fn request_timeout(&self) -> Option<Duration> {
		non_zero_secs(self.request_timeout_secs)
	}

	/// Startup timeout, `None` when disabled.
	pub fn startup_timeout_duration(&self) -> Option<Duration> {
		non_zero_secs(self.startup_timeout_secs)
	}

	/// Grace period after killing the process.
	pub fn stop_timeout(&self) -> Duration {
		Duration::from_secs(self.stop_timeout_secs)
	}

	/// Build the process invocation for `target`.
	///
	/// `host_pid` lets the server exit on its own when the host dies.
	pub fn launch_spec(&self, target: &LaunchTarget, host_pid: u32) -> LaunchSpec {
		let mut args = vec![
			String::from("-s"),
			target.path.to_string_lossy().into_owned(),
			String::from("--hostPID"),
			host_pid.to_string(),
			String::from("--encoding"),
			String::from("utf-8"),
			String::from("--loglevel"),
			self.log_level.clone(),
		];
		args.extend(self.args.iter().cloned());

		LaunchSpec {
			program: self.command.clone(),
			args,
			cwd: target.working_dir().to_path_buf(),
			env: self.env.clone(),
		}
	}
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
	(secs > 0).then(|| Duration::from_secs(secs))
}
