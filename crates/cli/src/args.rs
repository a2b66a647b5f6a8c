use std::{path::PathBuf, process::exit};

use clap::Parser;

use entrypoint_supervisor::rewrite::Rewrite;

pub(crate) mod logging;

const OPTSET_DEBUGGING: &str = "Debugging";
const OPTSET_INIT: &str = "Initialization";
const OPTSET_SUPERVISION: &str = "Supervision";

/// Default location of the variables file; a missing file here is fine,
/// unlike anywhere else.
pub const DEFAULT_VARIABLES_FILE: &str = "/variables.yml";

/// Prepare a container and run its command under a minimal init.
///
/// Variables are read from the environment and from the variables file, the
/// file taking precedence. Pre-hooks may then adjust them. Every file under
/// the template root is rendered against the variables and placed at the
/// same relative path under the output root, keeping ownership and mode;
/// existing destinations are left alone. Hooks and post-hooks run last.
///
/// The command (arguments included) is itself rendered as a template, then
/// run under a small init that forwards signals to it and reaps orphaned
/// descendants, exiting with the command's own status.
///
/// Examples:
///
/// Run nginx under the supervisor after rendering its configuration:
///
///   $ entrypoint -- nginx -g 'daemon off;'
///
/// Drop SIGTERM instead of forwarding it:
///
///   $ entrypoint --rewrite term:none -- slow-shutdown-daemon
///
/// Skip the init layer entirely and just exec:
///
///   $ entrypoint --no-init -- some-oneshot-job
#[derive(Debug, Clone, Parser)]
#[command(name = "entrypoint", bin_name = "entrypoint", author, version, disable_version_flag = true)]
#[allow(clippy::struct_excessive_bools)]
pub struct Args {
	/// Print version
	#[arg(long = "version", action = clap::ArgAction::Version)]
	pub version: (),

	/// Command to execute once initialization is done
	///
	/// The first word is resolved against PATH. Each element is rendered as
	/// a template against the variable space before being used, so
	/// '{{ port }}' in an argument works the same as in a template file.
	///
	/// Put '--' before the command if any of its arguments start with '-'.
	#[arg(trailing_var_arg = true, required = true, value_name = "COMMAND")]
	pub command: Vec<String>,

	/// Skip PID 1 duties and exec the command directly
	///
	/// The process image is replaced outright: no fork, no signal
	/// forwarding, no reaping. Initialization still runs first.
	#[arg(long, help_heading = OPTSET_SUPERVISION)]
	pub no_init: bool,

	/// Keep the command in the current session
	///
	/// By default the command is started in its own session and signals are
	/// forwarded to its whole process group. With this option no new
	/// session is created and signals are delivered to the command's pid
	/// only.
	#[arg(long, help_heading = OPTSET_SUPERVISION)]
	pub no_setsid: bool,

	/// Rewrite a forwarded signal
	///
	/// Both sides are signal names, with or without the 'SIG' prefix, in
	/// any case. The special target 'NONE' drops the signal instead of
	/// forwarding it. Can be repeated; a later rule for the same source
	/// signal wins.
	///
	/// The job-control signals TSTP, TTIN, and TTOU are rewritten to STOP
	/// unless a rule of yours says otherwise.
	#[arg(
		short = 'r',
		long = "rewrite",
		help_heading = OPTSET_SUPERVISION,
		value_name = "FROM:TO",
	)]
	pub rewrites: Vec<Rewrite>,

	/// YAML file providing template variables
	///
	/// The top level must be a mapping. Keys from the file shadow
	/// environment variables of the same name. If this option is left at
	/// its default and the file does not exist, initialization continues
	/// with the environment only; an explicitly given path must exist.
	#[arg(
		short = 'V',
		long = "variables",
		help_heading = OPTSET_INIT,
		value_name = "PATH",
		default_value = DEFAULT_VARIABLES_FILE,
	)]
	pub variables_file: PathBuf,

	/// Directory tree of templates to render
	///
	/// Every regular file below this root is a template; its rendered form
	/// lands at the same relative path under the output root. A missing
	/// tree means there is simply nothing to render.
	#[arg(
		short = 't',
		long = "templates",
		help_heading = OPTSET_INIT,
		value_name = "PATH",
		default_value = "/templates",
	)]
	pub template_root: PathBuf,

	/// Root directory for template includes
	///
	/// Templates here are never rendered on their own; they can be
	/// imported or included from the real templates. Must not live inside
	/// the template root.
	#[arg(
		short = 'j',
		long = "jinja",
		help_heading = OPTSET_INIT,
		value_name = "PATH",
		default_value = "/jinja",
	)]
	pub jinja_root: PathBuf,

	/// Destination root for rendered templates
	#[arg(
		short = 'o',
		long = "output",
		help_heading = OPTSET_INIT,
		value_name = "PATH",
		default_value = "/",
	)]
	pub output_root: PathBuf,

	/// Directory of hook units to run around template rendering
	///
	/// A unit is either an executable file directly in this directory, or
	/// a subdirectory holding any of the executables 'prehook', 'hook',
	/// and 'posthook'. Units run in name order; each invocation gets the
	/// variable space as JSON on stdin, and a prehook may print a replaced
	/// variable space on stdout.
	#[arg(
		short = 'H',
		long = "hooks",
		help_heading = OPTSET_INIT,
		value_name = "PATH",
		default_value = "/entrypoint_hooks",
	)]
	pub hooks_root: PathBuf,

	#[command(flatten)]
	pub logging: logging::LoggingArgs,
}

/// Parse the command line, or exit.
///
/// Usage errors exit 1 rather than clap's usual 2: a bad flag or rewrite is
/// a setup failure like any other. Help and version output still exit 0.
pub fn get_args() -> Args {
	Args::try_parse().unwrap_or_else(|err| {
		let code = i32::from(err.use_stderr());
		let _ = err.print();
		exit(code)
	})
}

#[cfg(test)]
mod tests {
	use super::Args;
	use clap::Parser;
	use nix::sys::signal::Signal;

	fn parse(args: &[&str]) -> Args {
		Args::try_parse_from([&["entrypoint"][..], args].concat()).expect("args parse")
	}

	#[test]
	fn command_after_separator() {
		let args = parse(&["--", "sh", "-c", "exit 0"]);
		assert_eq!(args.command, ["sh", "-c", "exit 0"]);
		assert!(!args.no_init);
		assert!(!args.no_setsid);
	}

	#[test]
	fn missing_command_is_an_error() {
		assert!(Args::try_parse_from(["entrypoint"]).is_err());
		assert!(Args::try_parse_from(["entrypoint", "--no-init"]).is_err());
	}

	#[test]
	fn rewrites_accumulate() {
		let args = parse(&["-r", "term:quit", "--rewrite", "usr1:none", "--", "true"]);
		assert_eq!(args.rewrites.len(), 2);
		assert_eq!(args.rewrites[0].from, Signal::SIGTERM);
		assert_eq!(args.rewrites[0].to, Some(Signal::SIGQUIT));
		assert_eq!(args.rewrites[1].from, Signal::SIGUSR1);
		assert_eq!(args.rewrites[1].to, None);
	}

	#[test]
	fn bad_rewrite_is_an_error() {
		assert!(Args::try_parse_from(["entrypoint", "-r", "term", "--", "true"]).is_err());
		assert!(Args::try_parse_from(["entrypoint", "-r", "nope:term", "--", "true"]).is_err());
	}

	#[test]
	fn path_overrides() {
		let args = parse(&["-t", "/srv/tpl", "-o", "/srv/out", "--", "true"]);
		assert_eq!(args.template_root.to_str(), Some("/srv/tpl"));
		assert_eq!(args.output_root.to_str(), Some("/srv/out"));
		assert_eq!(args.variables_file.to_str(), Some("/variables.yml"));
	}
}
