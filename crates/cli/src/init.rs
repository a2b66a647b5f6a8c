//! The initialization driver.
//!
//! Runs the pre-exec work in its fixed order: collect variables, run
//! prehooks (which may change them), render the template tree, then run
//! hooks and posthooks against the now-frozen variables. The first failure
//! aborts the run; nothing of this is retried and none of it happens after
//! the command has been launched.

use std::path::Path;

use miette::Result;
use tracing::debug;

use crate::{
	args::{Args, DEFAULT_VARIABLES_FILE},
	hooks, templates,
	variables::{self, Variables},
};

/// Run the whole initialization sequence and return the frozen variables.
pub fn initialize(args: &Args, renderer: &templates::Renderer) -> Result<Variables> {
	let explicit = args.variables_file != Path::new(DEFAULT_VARIABLES_FILE);
	let mut vars = variables::load(&args.variables_file, explicit)?;

	let hooks = hooks::discover(&args.hooks_root)?;
	hooks.run_prehooks(&mut vars)?;

	let ctx = templates::context(&vars);
	renderer.render_tree(&args.template_root, &args.output_root, &ctx)?;

	hooks.run_hooks(&vars)?;
	hooks.run_posthooks(&vars)?;

	debug!("initialization done");
	Ok(vars)
}
