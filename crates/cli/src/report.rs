//! One-line summaries of bus events for the terminal.

use omni_session::ServerEvent;
use omni_session::events::BackgroundWorkPhase;

/// Summary of `event`, or `None` for events only worth a log line.
pub fn describe(event: &ServerEvent) -> Option<String> {
	let text = match event {
		ServerEvent::BeforeServerStart(target) => format!("starting server for {target}"),
		ServerEvent::ServerStart(target) => format!("server ready ({target})"),
		ServerEvent::ServerStop => "server stopped".to_owned(),
		ServerEvent::ServerError(failure) => format!("server error: {failure}"),
		ServerEvent::MultipleLaunchTargets(targets) => {
			let mut text = String::from("several launch targets found; pick one with :restart <path>");
			for target in targets {
				text.push_str(&format!("\n  {} ({})", target.path.display(), target.label));
			}
			text
		}
		ServerEvent::ProjectAdded(info) => format!("project added: {}", info.project_path().unwrap_or("?")),
		ServerEvent::ProjectRemoved(info) => format!("project removed: {}", info.project_path().unwrap_or("?")),
		ServerEvent::PackageRestore(msg) if !msg.succeeded => format!("package restore failed: {}", msg.file_name),
		ServerEvent::UnresolvedDependencies(msg) => format!(
			"unresolved dependencies in {}: {}",
			msg.file_name,
			msg.unresolved_dependencies
				.iter()
				.map(|dep| dep.name.as_str())
				.collect::<Vec<_>>()
				.join(", ")
		),
		ServerEvent::BackgroundWork(status) if status.status == BackgroundWorkPhase::Finished => {
			format!("background analysis finished ({} files)", status.number_files_total)
		}
		ServerEvent::Error(err) => format!("server reported: {}", err.text),
		_ => return None,
	};
	Some(text)
}
