use std::env::var;

use clap::{ArgAction, Parser};
use tracing::{debug, warn};

#[derive(Debug, Clone, Parser)]
pub struct LoggingArgs {
	/// Set diagnostic log level
	///
	/// The default level prints progress messages; use once for debug
	/// detail and twice for trace-everything. Logs always go to stderr,
	/// stdout belongs to the command.
	///
	/// Setting $RUST_LOG also works, and takes precedence, but it is the
	/// only way to get logs from before the arguments are parsed.
	#[arg(
		long,
		short,
		help_heading = super::OPTSET_DEBUGGING,
		action = ArgAction::Count,
		conflicts_with = "quiet",
	)]
	pub verbose: u8,

	/// Print only errors
	#[arg(long, short, help_heading = super::OPTSET_DEBUGGING)]
	pub quiet: bool,
}

/// Set up logging from $RUST_LOG, before arguments are available.
///
/// Returns whether logging is now configured.
pub(crate) fn preargs() -> bool {
	if var("RUST_LOG").is_err() {
		return false;
	}

	match tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_writer(std::io::stderr)
		.try_init()
	{
		Ok(()) => {
			warn!(RUST_LOG=%var("RUST_LOG").unwrap(), "logging configured from RUST_LOG");
			true
		}
		Err(e) => {
			eprintln!("Failed to initialise logging with RUST_LOG, falling back\n{e}");
			false
		}
	}
}

/// Set up logging from the parsed arguments.
pub(crate) fn postargs(args: &LoggingArgs) {
	let filter = if args.quiet {
		"error"
	} else {
		match args.verbose {
			0 => "info",
			1 => "debug",
			_ => "trace",
		}
	};

	match tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.try_init()
	{
		Ok(()) => debug!(%filter, "logging initialised"),
		Err(e) => eprintln!("Failed to initialise logging, continuing with none\n{e}"),
	}
}
