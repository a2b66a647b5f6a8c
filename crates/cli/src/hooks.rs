//! Discovery and invocation of init hooks.
//!
//! A hook unit is a direct entry of the hooks directory. An executable
//! file is a unit offering the plain `hook` entry point; a subdirectory is
//! a unit offering whichever of the executables `prehook`, `hook`, and
//! `posthook` it contains. Units run in name order.
//!
//! Every invocation is a subprocess: the unit's entry point is run with
//! the phase name as its only argument and the variable space as a JSON
//! object on stdin. A prehook may print a complete replacement variable
//! space on stdout; the other phases see the variables read-only and keep
//! their stdout.

use std::{
	fmt, fs,
	io::Write,
	os::unix::fs::PermissionsExt,
	path::{Path, PathBuf},
	process::{Command, ExitStatus, Stdio},
};

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, warn};

use crate::variables::Variables;

/// A single hook unit and the entry points it offers.
#[derive(Debug)]
pub struct Unit {
	name: String,
	prehook: Option<PathBuf>,
	hook: Option<PathBuf>,
	posthook: Option<PathBuf>,
}

/// The hook units of one hooks directory, in invocation order.
#[derive(Debug, Default)]
pub struct Hooks {
	units: Vec<Unit>,
}

/// The three points a unit can hook into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
	/// Before template rendering; may change the variables.
	Pre,

	/// After template rendering.
	Main,

	/// Last, after every `Main` has run.
	Post,
}

impl Phase {
	fn entry_point(self) -> &'static str {
		match self {
			Self::Pre => "prehook",
			Self::Main => "hook",
			Self::Post => "posthook",
		}
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.entry_point())
	}
}

/// Errors from hook discovery or invocation.
#[derive(Debug, Diagnostic, Error)]
pub enum HookError {
	/// The hooks directory could not be scanned.
	#[error("cannot scan hooks directory {path:?}")]
	Scan {
		/// The hooks directory.
		path: PathBuf,

		/// The error which occurred.
		#[source]
		source: std::io::Error,
	},

	/// A unit directory offers no entry point at all, which is always a
	/// packaging mistake worth failing on.
	#[error("hook unit `{unit}` has none of prehook, hook, posthook")]
	NoEntryPoints {
		/// The unit concerned.
		unit: String,
	},

	/// An entry point could not be started or communicated with.
	#[error("cannot run {phase} of hook unit `{unit}`")]
	Invoke {
		/// The unit concerned.
		unit: String,

		/// The phase being run.
		phase: Phase,

		/// The error which occurred.
		#[source]
		source: std::io::Error,
	},

	/// An entry point ran and failed.
	#[error("{phase} of hook unit `{unit}` failed: {status}")]
	Failed {
		/// The unit concerned.
		unit: String,

		/// The phase being run.
		phase: Phase,

		/// How the entry point exited.
		status: ExitStatus,
	},

	/// A prehook printed something that is not a variable space.
	#[error("prehook of unit `{unit}` printed invalid variables: {reason}")]
	BadPrehookOutput {
		/// The unit concerned.
		unit: String,

		/// What was wrong with the output.
		reason: String,
	},
}

/// Find the hook units under the given directory.
///
/// A missing directory simply means there are no hooks.
pub fn discover(root: &Path) -> Result<Hooks, HookError> {
	if !root.is_dir() {
		debug!(?root, "no hooks directory");
		return Ok(Hooks::default());
	}

	let scan_err = |source| HookError::Scan {
		path: root.to_owned(),
		source,
	};
	let mut entries = fs::read_dir(root)
		.and_then(Iterator::collect::<std::io::Result<Vec<_>>>)
		.map_err(scan_err)?;
	entries.sort_by_key(fs::DirEntry::file_name);

	let mut units = Vec::new();
	for entry in entries {
		let path = entry.path();
		let name = entry.file_name().to_string_lossy().into_owned();
		let meta = fs::metadata(&path).map_err(scan_err)?;

		if meta.is_dir() {
			let unit = Unit {
				prehook: entry_point(&path, Phase::Pre),
				hook: entry_point(&path, Phase::Main),
				posthook: entry_point(&path, Phase::Post),
				name,
			};
			if unit.prehook.is_none() && unit.hook.is_none() && unit.posthook.is_none() {
				return Err(HookError::NoEntryPoints { unit: unit.name });
			}
			debug!(unit=%unit.name, ?unit.prehook, ?unit.hook, ?unit.posthook, "discovered hook unit");
			units.push(unit);
		} else if is_executable(&meta) {
			debug!(unit=%name, ?path, "discovered plain hook unit");
			units.push(Unit {
				name,
				prehook: None,
				hook: Some(path),
				posthook: None,
			});
		} else {
			warn!(?path, "ignoring non-executable file in hooks directory");
		}
	}

	Ok(Hooks { units })
}

fn entry_point(dir: &Path, phase: Phase) -> Option<PathBuf> {
	let path = dir.join(phase.entry_point());
	fs::metadata(&path)
		.ok()
		.filter(|meta| meta.is_file() && is_executable(meta))
		.map(|_| path)
}

fn is_executable(meta: &fs::Metadata) -> bool {
	meta.permissions().mode() & 0o111 != 0
}

impl Hooks {
	/// Run every prehook, letting each replace the variable space.
	pub fn run_prehooks(&self, vars: &mut Variables) -> Result<(), HookError> {
		for unit in &self.units {
			let Some(program) = &unit.prehook else {
				continue;
			};
			if let Some(replaced) = invoke(unit, Phase::Pre, program, vars)? {
				debug!(unit=%unit.name, "prehook replaced the variable space");
				*vars = replaced;
			}
		}
		Ok(())
	}

	/// Run every main hook.
	pub fn run_hooks(&self, vars: &Variables) -> Result<(), HookError> {
		for unit in &self.units {
			if let Some(program) = &unit.hook {
				invoke(unit, Phase::Main, program, vars)?;
			}
		}
		Ok(())
	}

	/// Run every posthook.
	pub fn run_posthooks(&self, vars: &Variables) -> Result<(), HookError> {
		for unit in &self.units {
			if let Some(program) = &unit.posthook {
				invoke(unit, Phase::Post, program, vars)?;
			}
		}
		Ok(())
	}
}

fn invoke(
	unit: &Unit,
	phase: Phase,
	program: &Path,
	vars: &Variables,
) -> Result<Option<Variables>, HookError> {
	debug!(unit=%unit.name, %phase, ?program, "running hook");

	let invoke_err = |source| HookError::Invoke {
		unit: unit.name.clone(),
		phase,
		source,
	};

	let mut command = Command::new(program);
	command.arg(phase.entry_point()).stdin(Stdio::piped());
	if phase == Phase::Pre {
		command.stdout(Stdio::piped());
	}

	let mut child = command.spawn().map_err(invoke_err)?;

	let payload = serde_json::to_vec(vars).expect("UNWRAP: a map of JSON values always serializes");
	let mut stdin = child.stdin.take().expect("UNWRAP: stdin was piped above");
	if let Err(err) = stdin.write_all(&payload) {
		// A unit that exits without reading its stdin is judged on its
		// exit status, not on the broken pipe it left behind.
		if err.kind() != std::io::ErrorKind::BrokenPipe {
			return Err(invoke_err(err));
		}
	}
	drop(stdin);

	if phase == Phase::Pre {
		let output = child.wait_with_output().map_err(invoke_err)?;
		if !output.status.success() {
			return Err(HookError::Failed {
				unit: unit.name.clone(),
				phase,
				status: output.status,
			});
		}

		let text = String::from_utf8_lossy(&output.stdout);
		let text = text.trim();
		if text.is_empty() {
			return Ok(None);
		}
		serde_json::from_str::<Variables>(text)
			.map(Some)
			.map_err(|err| HookError::BadPrehookOutput {
				unit: unit.name.clone(),
				reason: err.to_string(),
			})
	} else {
		let status = child.wait().map_err(invoke_err)?;
		if status.success() {
			Ok(None)
		} else {
			Err(HookError::Failed {
				unit: unit.name.clone(),
				phase,
				status,
			})
		}
	}
}
