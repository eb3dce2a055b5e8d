//! Launch targets and workspace discovery.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ignore::WalkBuilder;

use crate::Result;

/// What a [`LaunchTarget`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetKind {
	/// A `.sln` / `.slnx` file.
	Solution,
	/// A single `.csproj` file.
	Project,
	/// A directory the server scans for projects and scripts.
	Folder,
}

/// The solution, project or folder a session analyses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaunchTarget {
	/// Path passed to the server with `-s`.
	pub path: PathBuf,
	/// Target kind.
	pub kind: TargetKind,
	/// Short display name.
	pub label: String,
	/// Longer display text, usually the containing directory.
	pub description: String,
}

impl LaunchTarget {
	/// Classifies `path` by extension, falling back to [`TargetKind::Folder`].
	pub fn from_path(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let kind = match path.extension().and_then(|ext| ext.to_str()) {
			Some("sln" | "slnx") => TargetKind::Solution,
			Some("csproj") => TargetKind::Project,
			_ => TargetKind::Folder,
		};
		Self::new(path, kind)
	}

	/// Creates a target of a known kind.
	pub fn new(path: PathBuf, kind: TargetKind) -> Self {
		let label = path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| path.display().to_string());
		let description = match kind {
			TargetKind::Folder => path.display().to_string(),
			_ => path
				.parent()
				.map(|dir| dir.display().to_string())
				.unwrap_or_default(),
		};
		Self {
			path,
			kind,
			label,
			description,
		}
	}

	/// Directory the server process runs in.
	pub fn working_dir(&self) -> &Path {
		match self.kind {
			TargetKind::Folder => &self.path,
			_ => self
				.path
				.parent()
				.filter(|dir| !dir.as_os_str().is_empty())
				.unwrap_or(Path::new(".")),
		}
	}
}

impl fmt::Display for LaunchTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.path.display())
	}
}

/// Finds candidate targets in a workspace.
#[async_trait]
pub trait TargetResolver: Send + Sync + 'static {
	/// Returns zero, one or many candidates under `workspace_root`.
	async fn resolve(&self, workspace_root: &Path) -> Result<Vec<LaunchTarget>>;
}

/// Resolver that walks the file system.
///
/// Returns every solution file, plus the workspace folder itself when it holds
/// any `.csproj`, `.csx` or `.cake` file. Ignore files are honoured and
/// `node_modules` is never entered.
#[derive(Debug, Clone, Copy)]
pub struct FsTargetResolver {
	max_depth: usize,
}

impl FsTargetResolver {
	/// Creates a resolver that descends at most `max_depth` directories.
	pub fn new(max_depth: usize) -> Self {
		Self { max_depth }
	}
}

impl Default for FsTargetResolver {
	fn default() -> Self {
		Self::new(5)
	}
}

#[async_trait]
impl TargetResolver for FsTargetResolver {
	async fn resolve(&self, workspace_root: &Path) -> Result<Vec<LaunchTarget>> {
		let root = workspace_root.to_path_buf();
		let max_depth = self.max_depth;
		tokio::task::spawn_blocking(move || scan(&root, max_depth))
			.await
			.map_err(std::io::Error::other)?
	}
}

fn scan(root: &Path, max_depth: usize) -> Result<Vec<LaunchTarget>> {
	if !root.is_dir() {
		return Err(std::io::Error::new(
			std::io::ErrorKind::NotFound,
			format!("workspace root {} is not a directory", root.display()),
		)
		.into());
	}

	let walker = WalkBuilder::new(root)
		.standard_filters(true)
		.follow_links(false)
		.max_depth(Some(max_depth))
		.filter_entry(|entry| entry.file_name() != "node_modules")
		.build();

	let mut targets = Vec::new();
	let mut has_sources = false;

	for entry in walker {
		let entry = match entry {
			Ok(entry) => entry,
			Err(err) => {
				tracing::warn!(error = %err, "target scan entry error");
				continue;
			}
		};
		if !entry.file_type().is_some_and(|ft| ft.is_file()) {
			continue;
		}

		match entry.path().extension().and_then(|ext| ext.to_str()) {
			Some("sln" | "slnx") => {
				targets.push(LaunchTarget::new(entry.into_path(), TargetKind::Solution));
			}
			Some("csproj" | "csx" | "cake") => has_sources = true,
			_ => {}
		}
	}

	if has_sources {
		targets.push(LaunchTarget::new(root.to_path_buf(), TargetKind::Folder));
	}

	targets.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.path.cmp(&b.path)));
	tracing::debug!(root = %root.display(), count = targets.len(), "resolved launch targets");
	Ok(targets)
}
