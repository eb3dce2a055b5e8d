//! Typed server notifications and session lifecycle events.
//!
//! Wire events are decoded from [`EventPacket`]s by [`ServerEvent::from_packet`];
//! lifecycle variants are emitted by the session manager directly. Both travel
//! over the same [`EventBus`].

use std::fmt;

use omni_protocol::{EventPacket, JsonValue, MalformedPacket};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::session::SessionFailure;
use crate::target::LaunchTarget;

mod bus;

pub use bus::{EventBus, Subscription};

/// Wire name of the readiness event.
pub const READY_EVENT: &str = "started";

/// Body of `ProjectAdded`, `ProjectChanged` and `ProjectRemoved`.
///
/// Kept as a JSON object; the project model is opaque to the session core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ProjectInformation(pub serde_json::Map<String, JsonValue>);

impl ProjectInformation {
	/// Path of the MSBuild project, when the server reported one.
	pub fn project_path(&self) -> Option<&str> {
		self.0.get("MsBuildProject")?.get("Path")?.as_str()
	}
}

/// Body of `PackageRestoreStarted` and `PackageRestoreFinished`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PackageRestoreMessage {
	/// Project file being restored.
	pub file_name: String,
	/// Restore result; always `false` for the start notification.
	#[serde(default)]
	pub succeeded: bool,
}

/// A package reference the server could not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PackageDependency {
	/// Package id.
	pub name: String,
	/// Requested version range.
	#[serde(default)]
	pub version: Option<String>,
}

/// Body of `UnresolvedDependencies`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnresolvedDependenciesMessage {
	/// Project file with missing packages.
	pub file_name: String,
	/// Packages that need a restore.
	#[serde(default)]
	pub unresolved_dependencies: Vec<PackageDependency>,
}

/// One MSBuild warning or error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[allow(missing_docs)]
pub struct MsBuildDiagnostic {
	pub file_name: String,
	pub text: String,
	#[serde(default)]
	pub log_level: String,
	#[serde(default)]
	pub start_line: u32,
	#[serde(default)]
	pub start_column: u32,
	#[serde(default)]
	pub end_line: u32,
	#[serde(default)]
	pub end_column: u32,
}

/// Body of `MsBuildProjectDiagnostics`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MsBuildDiagnosticsMessage {
	/// Project file the diagnostics belong to.
	pub file_name: String,
	/// Build warnings.
	#[serde(default)]
	pub warnings: Vec<MsBuildDiagnostic>,
	/// Build errors.
	#[serde(default)]
	pub errors: Vec<MsBuildDiagnostic>,
}

/// Diagnostics for one document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiagnosticResult {
	/// Document path.
	pub file_name: String,
	/// Diagnostic locations, forwarded untouched.
	#[serde(default)]
	pub quick_fixes: Vec<JsonValue>,
}

/// Body of `Diagnostic`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiagnosticMessage {
	/// Per-document results.
	pub results: Vec<DiagnosticResult>,
}

/// Progress of the server's background analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum BackgroundWorkPhase {
	/// Analysis queued.
	Started,
	/// Analysis running.
	Progress,
	/// Analysis complete.
	Finished,
}

impl TryFrom<u8> for BackgroundWorkPhase {
	type Error = String;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::Started),
			1 => Ok(Self::Progress),
			2 => Ok(Self::Finished),
			other => Err(format!("unknown background work status {other}")),
		}
	}
}

/// Body of `BackgroundDiagnosticStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[allow(missing_docs)]
pub struct BackgroundWorkStatus {
	pub status: BackgroundWorkPhase,
	#[serde(default)]
	pub number_projects: u32,
	#[serde(default)]
	pub number_files_total: u32,
	#[serde(default)]
	pub number_files_remaining: u32,
}

/// Body of `log`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogMessage {
	/// Server log level name, e.g. `INFORMATION`.
	pub log_level: String,
	/// Logger category.
	#[serde(default)]
	pub name: String,
	/// Log text.
	pub message: String,
}

/// Body of `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorMessage {
	/// Error text.
	pub text: String,
	/// Source file, when the error is tied to one.
	#[serde(default)]
	pub file_name: Option<String>,
	/// 1-based line.
	#[serde(default)]
	pub line: Option<u32>,
	/// 1-based column.
	#[serde(default)]
	pub column: Option<u32>,
}

/// Everything published on the [`EventBus`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
	/// A project was loaded.
	ProjectAdded(ProjectInformation),
	/// A loaded project changed.
	ProjectChanged(ProjectInformation),
	/// A project was unloaded.
	ProjectRemoved(ProjectInformation),
	/// Package restore began.
	BeforePackageRestore(PackageRestoreMessage),
	/// Package restore completed.
	PackageRestore(PackageRestoreMessage),
	/// A project references packages that are not restored.
	UnresolvedDependencies(UnresolvedDependenciesMessage),
	/// MSBuild reported diagnostics while loading a project.
	MsBuildDiagnostics(MsBuildDiagnosticsMessage),
	/// Pushed document diagnostics.
	Diagnostics(DiagnosticMessage),
	/// Background analysis progress.
	BackgroundWork(BackgroundWorkStatus),
	/// Server log line.
	Log(LogMessage),
	/// Server-side error report.
	Error(ErrorMessage),
	/// An event the session core does not model, or one whose body did not match.
	Unknown {
		/// Wire event name.
		event: String,
		/// Raw payload.
		body: JsonValue,
	},
	/// A process is about to be spawned for the target.
	BeforeServerStart(LaunchTarget),
	/// The server signalled readiness.
	ServerStart(LaunchTarget),
	/// The session ended, requested or not.
	ServerStop,
	/// The session failed to start or died.
	ServerError(SessionFailure),
	/// Auto-start found several targets and needs a choice.
	MultipleLaunchTargets(Vec<LaunchTarget>),
	/// One line of the process's stderr.
	StderrLine(String),
	/// An undecodable line on the process's stdout.
	MalformedPacket(MalformedPacket),
}

impl ServerEvent {
	/// Maps a wire event to its typed variant.
	///
	/// A known event whose body has the wrong shape becomes [`ServerEvent::Unknown`].
	pub fn from_packet(packet: EventPacket) -> Self {
		let EventPacket { event, body } = packet;
		let typed = match event.as_str() {
			"ProjectAdded" => decode(&event, &body, Self::ProjectAdded),
			"ProjectChanged" => decode(&event, &body, Self::ProjectChanged),
			"ProjectRemoved" => decode(&event, &body, Self::ProjectRemoved),
			"PackageRestoreStarted" => decode(&event, &body, Self::BeforePackageRestore),
			"PackageRestoreFinished" => decode(&event, &body, Self::PackageRestore),
			"UnresolvedDependencies" => decode(&event, &body, Self::UnresolvedDependencies),
			"MsBuildProjectDiagnostics" => decode(&event, &body, Self::MsBuildDiagnostics),
			"Diagnostic" => decode(&event, &body, Self::Diagnostics),
			"BackgroundDiagnosticStatus" => decode(&event, &body, Self::BackgroundWork),
			"log" => decode(&event, &body, Self::Log),
			"Error" => decode(&event, &body, Self::Error),
			_ => None,
		};
		typed.unwrap_or(Self::Unknown { event, body })
	}

	/// Subscription key of this event.
	pub fn kind(&self) -> EventKind {
		match self {
			Self::ProjectAdded(_) => EventKind::ProjectAdded,
			Self::ProjectChanged(_) => EventKind::ProjectChanged,
			Self::ProjectRemoved(_) => EventKind::ProjectRemoved,
			Self::BeforePackageRestore(_) => EventKind::BeforePackageRestore,
			Self::PackageRestore(_) => EventKind::PackageRestore,
			Self::UnresolvedDependencies(_) => EventKind::UnresolvedDependencies,
			Self::MsBuildDiagnostics(_) => EventKind::MsBuildDiagnostics,
			Self::Diagnostics(_) => EventKind::Diagnostics,
			Self::BackgroundWork(_) => EventKind::BackgroundWork,
			Self::Log(_) => EventKind::Log,
			Self::Error(_) => EventKind::Error,
			Self::Unknown { .. } => EventKind::Unknown,
			Self::BeforeServerStart(_) => EventKind::BeforeServerStart,
			Self::ServerStart(_) => EventKind::ServerStart,
			Self::ServerStop => EventKind::ServerStop,
			Self::ServerError(_) => EventKind::ServerError,
			Self::MultipleLaunchTargets(_) => EventKind::MultipleLaunchTargets,
			Self::StderrLine(_) => EventKind::StderrLine,
			Self::MalformedPacket(_) => EventKind::MalformedPacket,
		}
	}
}

fn decode<T: DeserializeOwned>(
	event: &str,
	body: &JsonValue,
	wrap: impl FnOnce(T) -> ServerEvent,
) -> Option<ServerEvent> {
	match T::deserialize(body) {
		Ok(value) => Some(wrap(value)),
		Err(error) => {
			tracing::warn!(event, %error, "event body does not match expected shape");
			None
		}
	}
}

/// Field-less discriminant of [`ServerEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EventKind {
	ProjectAdded,
	ProjectChanged,
	ProjectRemoved,
	BeforePackageRestore,
	PackageRestore,
	UnresolvedDependencies,
	MsBuildDiagnostics,
	Diagnostics,
	BackgroundWork,
	Log,
	Error,
	Unknown,
	BeforeServerStart,
	ServerStart,
	ServerStop,
	ServerError,
	MultipleLaunchTargets,
	StderrLine,
	MalformedPacket,
}

impl EventKind {
	/// Every kind, in declaration order.
	pub const ALL: [EventKind; 19] = [
		Self::ProjectAdded,
		Self::ProjectChanged,
		Self::ProjectRemoved,
		Self::BeforePackageRestore,
		Self::PackageRestore,
		Self::UnresolvedDependencies,
		Self::MsBuildDiagnostics,
		Self::Diagnostics,
		Self::BackgroundWork,
		Self::Log,
		Self::Error,
		Self::Unknown,
		Self::BeforeServerStart,
		Self::ServerStart,
		Self::ServerStop,
		Self::ServerError,
		Self::MultipleLaunchTargets,
		Self::StderrLine,
		Self::MalformedPacket,
	];

	/// Kebab-case subscription name, e.g. `project-added`.
	pub const fn name(self) -> &'static str {
		match self {
			Self::ProjectAdded => "project-added",
			Self::ProjectChanged => "project-changed",
			Self::ProjectRemoved => "project-removed",
			Self::BeforePackageRestore => "before-package-restore",
			Self::PackageRestore => "package-restore",
			Self::UnresolvedDependencies => "unresolved-dependencies",
			Self::MsBuildDiagnostics => "msbuild-diagnostics",
			Self::Diagnostics => "diagnostics",
			Self::BackgroundWork => "background-work",
			Self::Log => "log",
			Self::Error => "error",
			Self::Unknown => "unknown",
			Self::BeforeServerStart => "before-server-start",
			Self::ServerStart => "server-start",
			Self::ServerStop => "server-stop",
			Self::ServerError => "server-error",
			Self::MultipleLaunchTargets => "multiple-launch-targets",
			Self::StderrLine => "stderr-line",
			Self::MalformedPacket => "malformed-packet",
		}
	}

	/// Looks a kind up by its [`name`](Self::name).
	pub fn from_name(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|kind| kind.name() == name)
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}
