#![deny(rust_2018_idioms)]

use miette::Result;
use tracing::{debug, warn};

use entrypoint_supervisor::{launch, rewrite::Rewrites, Settings};

use crate::args::Args;

pub mod args;
mod exec;
mod hooks;
mod init;
mod templates;
mod variables;

pub use variables::Variables;

/// Run the entrypoint: initialize the container, then hand over to the
/// command — through the init layer, or directly with `--no-init`.
pub fn run() -> Result<()> {
	let args = setup();
	debug!(?args, "arguments");

	let renderer = templates::Renderer::new(&args.template_root, &args.jinja_root)?;

	let vars = if skip_requested() {
		debug!("SKIP_ENTRYPOINT is set, skipping initialization");
		Variables::default()
	} else {
		init::initialize(&args, &renderer)?
	};

	// The command line is itself templated, arguments included.
	let ctx = templates::context(&vars);
	let mut command = Vec::with_capacity(args.command.len());
	for arg in &args.command {
		command.push(renderer.render_str(arg, &ctx)?);
	}

	if !args.no_init {
		let rewrites = Rewrites::build(&args.rewrites);
		// Returns in the forked child only; the parent side becomes the
		// init loop and exits on its own once the child is gone.
		launch(
			rewrites,
			Settings {
				use_setsid: !args.no_setsid,
			},
		)?;
	}

	exec::exec(command)
}

fn setup() -> Args {
	let log_on = args::logging::preargs();
	let args = args::get_args();
	if log_on {
		warn!("ignoring logging options from args");
	} else {
		args::logging::postargs(&args.logging);
	}
	args
}

fn skip_requested() -> bool {
	std::env::var_os("SKIP_ENTRYPOINT").is_some_and(|value| !value.is_empty())
}
