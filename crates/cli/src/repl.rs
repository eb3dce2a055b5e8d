//! Line syntax of the interactive prompt.
//!
//! ```text
//! /findusages {"FileName": "Foo.cs", "Line": 10, "Column": 5}
//! !/autocomplete {"FileName": "Foo.cs", "Line": 3, "Column": 1, "WordToComplete": ""}
//! :restart Other.sln
//! ```
//!
//! A leading `!` sends the request with high priority. Directives start with `:`.

use std::path::PathBuf;

use omni_session::JsonValue;

/// One parsed prompt line.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
	/// Blank line.
	Empty,
	/// Send `command` with `arguments`.
	Request {
		command: String,
		arguments: JsonValue,
		high: bool,
	},
	/// Restart, optionally switching target.
	Restart(Option<PathBuf>),
	/// Stop the server.
	Stop,
	/// Print lifecycle state.
	Status,
	/// Print the directive list.
	Help,
	/// Leave the prompt.
	Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
	#[error("invalid JSON arguments: {0}")]
	InvalidJson(#[from] serde_json::Error),
	#[error("arguments must be a JSON object")]
	NotAnObject,
	#[error("unknown directive `:{0}` (try :help)")]
	UnknownDirective(String),
	#[error("requests start with `/`, directives with `:`")]
	Unrecognized,
}

pub const HELP: &str = "\
/<command> [json]   send a request, e.g. /checkalivestatus
!/<command> [json]  send with high priority
:restart [target]   restart, optionally with another solution or folder
:stop               stop the server
:status             show server state
:quit               stop and exit";

pub fn parse_line(line: &str) -> Result<ReplCommand, ParseError> {
	let line = line.trim();
	if line.is_empty() {
		return Ok(ReplCommand::Empty);
	}

	if let Some(directive) = line.strip_prefix(':') {
		let (name, rest) = split_word(directive);
		return match name {
			"restart" | "r" => Ok(ReplCommand::Restart((!rest.is_empty()).then(|| PathBuf::from(rest)))),
			"stop" => Ok(ReplCommand::Stop),
			"status" | "s" => Ok(ReplCommand::Status),
			"help" | "h" | "?" => Ok(ReplCommand::Help),
			"quit" | "q" | "exit" => Ok(ReplCommand::Quit),
			other => Err(ParseError::UnknownDirective(other.to_owned())),
		};
	}

	let (high, line) = match line.strip_prefix('!') {
		Some(rest) => (true, rest.trim_start()),
		None => (false, line),
	};
	if !line.starts_with('/') {
		return Err(ParseError::Unrecognized);
	}

	let (command, rest) = split_word(line);
	let arguments = if rest.is_empty() {
		JsonValue::Object(Default::default())
	} else {
		serde_json::from_str(rest)?
	};
	if !arguments.is_object() {
		return Err(ParseError::NotAnObject);
	}

	Ok(ReplCommand::Request {
		command: command.to_owned(),
		arguments,
		high,
	})
}

fn split_word(text: &str) -> (&str, &str) {
	match text.split_once(char::is_whitespace) {
		Some((word, rest)) => (word, rest.trim()),
		None => (text, ""),
	}
}
