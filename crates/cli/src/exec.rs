//! Process image replacement.

use std::ffi::CString;

use nix::unistd::execvp;
use tracing::error;

/// Replace the current process with the command.
///
/// The first element is resolved against PATH; the whole vector becomes the
/// new argv. On success this never returns. On failure the process exits
/// 127, the shell convention for a command that cannot be run — whether we
/// are the supervised child (the parent then reports 127) or running with
/// the init layer skipped.
pub fn exec(command: Vec<String>) -> ! {
	let argv: Vec<CString> = match command.iter().map(|arg| CString::new(arg.as_str())).collect() {
		Ok(argv) => argv,
		Err(err) => {
			error!(%err, ?command, "command contains a NUL byte");
			std::process::exit(127);
		}
	};

	let err = match execvp(&argv[0], &argv) {
		Err(err) => err,
		Ok(infallible) => match infallible {},
	};
	error!(%err, ?command, "cannot exec command");
	std::process::exit(127)
}
