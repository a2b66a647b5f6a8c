//! Rendering of the template tree.
//!
//! Every regular file under the template root is a minijinja template; its
//! rendered form is written at the same relative path under the output
//! root, with the source's ownership and mode. Destinations that already
//! exist are left alone, so rendering the same tree twice changes nothing.
//! A second root holds includes: templates that are never rendered on
//! their own but may be imported from the real ones.

use std::{
	fs,
	os::unix::fs::{MetadataExt, PermissionsExt},
	path::{Path, PathBuf},
};

use miette::Diagnostic;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use nix::unistd::{chown, Gid, Uid};
use thiserror::Error;
use tracing::{debug, warn};

use crate::variables::Variables;

/// Errors from template rendering.
#[derive(Debug, Diagnostic, Error)]
pub enum RenderError {
	/// The include root may not live inside the template tree, or it would
	/// be rendered like any other template.
	#[error("include root {jinja:?} is inside the template root {templates:?}")]
	IncludeRootInsideTemplates {
		/// The include root.
		jinja: PathBuf,

		/// The template root.
		templates: PathBuf,
	},

	/// Rendering one template failed.
	#[error("cannot render {path:?}: {source}")]
	Render {
		/// The failing template.
		path: PathBuf,

		/// The underlying template error.
		#[source]
		source: minijinja::Error,
	},

	/// Rendering a command-line argument failed.
	#[error("cannot render command argument `{arg}`: {source}")]
	Argument {
		/// The failing argument.
		arg: String,

		/// The underlying template error.
		#[source]
		source: minijinja::Error,
	},

	/// Filesystem work around a template failed.
	#[error("cannot process {path:?}")]
	Io {
		/// The path concerned.
		path: PathBuf,

		/// The error which occurred.
		#[source]
		source: std::io::Error,
	},
}

impl RenderError {
	fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
		let path = path.into();
		move |source| Self::Io { path, source }
	}
}

/// The template engine, configured once per run.
pub struct Renderer {
	env: Environment<'static>,
}

impl Renderer {
	/// Set up the engine with templates loadable from both roots.
	///
	/// Undefined variables are hard errors, matching how configuration
	/// templates want to fail: loudly, before the command starts.
	pub fn new(template_root: &Path, jinja_root: &Path) -> Result<Self, RenderError> {
		if jinja_root.starts_with(template_root) {
			return Err(RenderError::IncludeRootInsideTemplates {
				jinja: jinja_root.to_owned(),
				templates: template_root.to_owned(),
			});
		}

		let mut env = Environment::new();
		env.set_undefined_behavior(UndefinedBehavior::Strict);
		env.set_keep_trailing_newline(true);

		let roots = [template_root.to_owned(), jinja_root.to_owned()];
		env.set_loader(move |name| {
			if name.split('/').any(|part| part == "..") {
				return Err(minijinja::Error::new(
					ErrorKind::InvalidOperation,
					format!("template name {name:?} escapes the template roots"),
				));
			}
			for root in &roots {
				let path = root.join(name);
				if path.is_file() {
					return fs::read_to_string(&path).map(Some).map_err(|err| {
						minijinja::Error::new(
							ErrorKind::InvalidOperation,
							format!("cannot read template {path:?}: {err}"),
						)
					});
				}
			}
			Ok(None)
		});

		filters::register(&mut env);
		globals::register(&mut env);

		Ok(Self { env })
	}

	/// Render a single string, as used for command-line arguments.
	pub fn render_str(&self, source: &str, ctx: &minijinja::Value) -> Result<String, RenderError> {
		self.env
			.render_str(source, ctx)
			.map_err(|err| RenderError::Argument {
				arg: source.to_owned(),
				source: err,
			})
	}

	/// Render the whole template tree into the output root.
	///
	/// A missing template root means there is nothing to render.
	pub fn render_tree(
		&self,
		template_root: &Path,
		output_root: &Path,
		ctx: &minijinja::Value,
	) -> Result<(), RenderError> {
		if !template_root.is_dir() {
			debug!(?template_root, "no template tree, nothing to render");
			return Ok(());
		}

		debug!(?template_root, ?output_root, "rendering template tree");
		if !output_root.exists() {
			fs::create_dir_all(output_root).map_err(RenderError::io(output_root))?;
			copy_ownership_and_mode(template_root, output_root)?;
		}
		self.render_dir(template_root, template_root, output_root, ctx)
	}

	fn render_dir(
		&self,
		dir: &Path,
		template_root: &Path,
		output_root: &Path,
		ctx: &minijinja::Value,
	) -> Result<(), RenderError> {
		let mut entries = fs::read_dir(dir)
			.and_then(Iterator::collect::<std::io::Result<Vec<_>>>)
			.map_err(RenderError::io(dir))?;
		entries.sort_by_key(fs::DirEntry::file_name);

		for entry in entries {
			let src = entry.path();
			// Follows symlinks: a link to a file renders like the file.
			let meta = fs::metadata(&src).map_err(RenderError::io(&src))?;
			let rel = src
				.strip_prefix(template_root)
				.expect("walk stays under the template root");
			let dst = output_root.join(rel);

			if meta.is_dir() {
				if !dst.exists() {
					fs::create_dir_all(&dst).map_err(RenderError::io(&dst))?;
					copy_ownership_and_mode(&src, &dst)?;
				}
				self.render_dir(&src, template_root, output_root, ctx)?;
			} else if meta.is_file() {
				if dst.exists() {
					warn!(?dst, "destination already exists, not overriding");
					continue;
				}

				let Some(name) = rel.to_str() else {
					warn!(?src, "skipping template with non-UTF-8 name");
					continue;
				};
				let rendered = self
					.env
					.get_template(name)
					.and_then(|template| template.render(ctx))
					.map_err(|source| RenderError::Render {
						path: src.clone(),
						source,
					})?;

				debug!(?src, ?dst, "rendered template");
				fs::write(&dst, rendered).map_err(RenderError::io(&dst))?;
				copy_ownership_and_mode(&src, &dst)?;
			}
		}

		Ok(())
	}
}

/// Wrap the variable space for the engine.
pub fn context(vars: &Variables) -> minijinja::Value {
	minijinja::Value::from_serialize(vars)
}

/// Mirror ownership and permission bits from `src` onto `dst`.
fn copy_ownership_and_mode(src: &Path, dst: &Path) -> Result<(), RenderError> {
	let meta = fs::metadata(src).map_err(RenderError::io(src))?;
	chown(
		dst,
		Some(Uid::from_raw(meta.uid())),
		Some(Gid::from_raw(meta.gid())),
	)
	.map_err(|errno| RenderError::Io {
		path: dst.to_owned(),
		source: errno.into(),
	})?;
	fs::set_permissions(dst, fs::Permissions::from_mode(meta.mode() & 0o7777))
		.map_err(RenderError::io(dst))
}

mod filters {
	use minijinja::{Environment, Error, ErrorKind, Value};

	pub(super) fn register(env: &mut Environment<'_>) {
		env.add_filter("split", split);
		env.add_filter("to_json", to_json);
		env.add_filter("to_pretty_json", to_pretty_json);
		env.add_filter("unique", unique);
		env.add_filter("union", union);
		env.add_filter("intersect", intersect);
		env.add_filter("difference", difference);
		env.add_filter("symmetric_difference", symmetric_difference);
	}

	fn split(value: String, sep: Option<String>, maxsplit: Option<i64>) -> Vec<String> {
		let max = maxsplit.filter(|m| *m >= 0).map(|m| m as usize);
		match sep {
			Some(sep) if !sep.is_empty() => match max {
				Some(m) => value.splitn(m + 1, &sep).map(str::to_owned).collect(),
				None => value.split(&sep).map(str::to_owned).collect(),
			},
			_ => value.split_whitespace().map(str::to_owned).collect(),
		}
	}

	fn to_json(value: Value) -> Result<String, Error> {
		serde_json::to_string(&value)
			.map_err(|err| Error::new(ErrorKind::InvalidOperation, err.to_string()))
	}

	fn to_pretty_json(value: Value) -> Result<String, Error> {
		serde_json::to_string_pretty(&value)
			.map_err(|err| Error::new(ErrorKind::InvalidOperation, err.to_string()))
	}

	fn unique(values: Vec<Value>) -> Vec<Value> {
		let mut out: Vec<Value> = Vec::with_capacity(values.len());
		for value in values {
			if !out.contains(&value) {
				out.push(value);
			}
		}
		out
	}

	fn union(values: Vec<Value>, other: Vec<Value>) -> Vec<Value> {
		unique(values.into_iter().chain(other).collect())
	}

	fn intersect(values: Vec<Value>, other: Vec<Value>) -> Vec<Value> {
		unique(
			values
				.into_iter()
				.filter(|value| other.contains(value))
				.collect(),
		)
	}

	fn difference(values: Vec<Value>, other: Vec<Value>) -> Vec<Value> {
		unique(
			values
				.into_iter()
				.filter(|value| !other.contains(value))
				.collect(),
		)
	}

	fn symmetric_difference(values: Vec<Value>, other: Vec<Value>) -> Vec<Value> {
		let both = intersect(values.clone(), other.clone());
		difference(union(values, other), both)
	}
}

mod globals {
	use minijinja::{Environment, Error, ErrorKind, Value};
	use tracing::{debug, error, info, warn};

	pub(super) fn register(env: &mut Environment<'_>) {
		env.add_function("glob", glob);
		env.add_function("fatal_error", fatal_error);
		env.add_function("log_debug", log_debug);
		env.add_function("log_info", log_info);
		env.add_function("log_warning", log_warning);
		env.add_function("log_error", log_error);
	}

	fn glob(pattern: String) -> Result<Vec<String>, Error> {
		let paths = glob::glob(&pattern).map_err(|err| {
			Error::new(
				ErrorKind::InvalidOperation,
				format!("bad glob pattern {pattern:?}: {err}"),
			)
		})?;
		Ok(paths
			.filter_map(Result::ok)
			.map(|path| path.display().to_string())
			.collect())
	}

	fn fatal_error(text: String) -> Result<Value, Error> {
		Err(Error::new(ErrorKind::InvalidOperation, text))
	}

	fn log_debug(message: String) -> String {
		debug!("{message}");
		String::new()
	}

	fn log_info(message: String) -> String {
		info!("{message}");
		String::new()
	}

	fn log_warning(message: String) -> String {
		warn!("{message}");
		String::new()
	}

	fn log_error(message: String) -> String {
		error!("{message}");
		String::new()
	}
}

#[cfg(test)]
mod tests {
	use super::{context, Renderer};
	use crate::variables::Variables;
	use serde_json::{json, Value};
	use std::{fs, path::Path};

	fn renderer(tpl: &Path, jinja: &Path) -> Renderer {
		Renderer::new(tpl, jinja).expect("renderer setup")
	}

	fn vars(pairs: &[(&str, Value)]) -> Variables {
		pairs
			.iter()
			.map(|(k, v)| ((*k).to_owned(), v.clone()))
			.collect()
	}

	#[test]
	fn renders_a_plain_string() {
		let dir = tempfile::tempdir().unwrap();
		let r = renderer(&dir.path().join("tpl"), &dir.path().join("jinja"));
		let ctx = context(&vars(&[("name", json!("world"))]));
		assert_eq!(r.render_str("hello {{ name }}", &ctx).unwrap(), "hello world");
		assert_eq!(r.render_str("no templating", &ctx).unwrap(), "no templating");
	}

	#[test]
	fn undefined_variables_are_errors() {
		let dir = tempfile::tempdir().unwrap();
		let r = renderer(&dir.path().join("tpl"), &dir.path().join("jinja"));
		let ctx = context(&Variables::default());
		assert!(r.render_str("{{ not_found }}", &ctx).is_err());
	}

	#[test]
	fn include_root_may_not_nest_in_template_root() {
		let dir = tempfile::tempdir().unwrap();
		let tpl = dir.path().join("tpl");
		assert!(Renderer::new(&tpl, &tpl.join("jinja")).is_err());
	}

	#[test]
	fn renders_tree_and_keeps_existing_files() {
		let dir = tempfile::tempdir().unwrap();
		let tpl = dir.path().join("tpl");
		let out = dir.path().join("out");
		fs::create_dir_all(tpl.join("etc/app")).unwrap();
		fs::create_dir(&out).unwrap();
		fs::write(tpl.join("etc/app/port.conf"), "port = {{ port }}\n").unwrap();
		fs::write(tpl.join("etc/app/keep.conf"), "{{ port }}\n").unwrap();
		fs::create_dir_all(out.join("etc/app")).unwrap();
		fs::write(out.join("etc/app/keep.conf"), "untouched\n").unwrap();

		let r = renderer(&tpl, &dir.path().join("jinja"));
		let ctx = context(&vars(&[("port", json!(8080))]));
		r.render_tree(&tpl, &out, &ctx).unwrap();

		assert_eq!(
			fs::read_to_string(out.join("etc/app/port.conf")).unwrap(),
			"port = 8080\n"
		);
		assert_eq!(
			fs::read_to_string(out.join("etc/app/keep.conf")).unwrap(),
			"untouched\n"
		);
	}

	#[test]
	fn rendering_twice_changes_nothing() {
		let dir = tempfile::tempdir().unwrap();
		let tpl = dir.path().join("tpl");
		let out = dir.path().join("out");
		fs::create_dir_all(&tpl).unwrap();
		fs::create_dir(&out).unwrap();
		fs::write(tpl.join("a.conf"), "value: {{ n }}").unwrap();

		let r = renderer(&tpl, &dir.path().join("jinja"));
		r.render_tree(&tpl, &out, &context(&vars(&[("n", json!(1))])))
			.unwrap();
		let first = fs::read_to_string(out.join("a.conf")).unwrap();

		// different variables, but the destination already exists
		r.render_tree(&tpl, &out, &context(&vars(&[("n", json!(2))])))
			.unwrap();
		assert_eq!(fs::read_to_string(out.join("a.conf")).unwrap(), first);
	}

	#[test]
	fn missing_template_root_is_a_noop() {
		let dir = tempfile::tempdir().unwrap();
		let r = renderer(&dir.path().join("tpl"), &dir.path().join("jinja"));
		r.render_tree(
			&dir.path().join("tpl"),
			&dir.path().join("out"),
			&context(&Variables::default()),
		)
		.unwrap();
	}

	#[test]
	fn includes_load_from_the_jinja_root() {
		let dir = tempfile::tempdir().unwrap();
		let tpl = dir.path().join("tpl");
		let jinja = dir.path().join("jinja");
		let out = dir.path().join("out");
		fs::create_dir_all(&tpl).unwrap();
		fs::create_dir_all(&jinja).unwrap();
		fs::create_dir(&out).unwrap();
		fs::write(jinja.join("greeting.j2"), "hi {{ name }}").unwrap();
		fs::write(tpl.join("msg.txt"), "{% include \"greeting.j2\" %}!").unwrap();

		let r = renderer(&tpl, &jinja);
		r.render_tree(&tpl, &out, &context(&vars(&[("name", json!("ops"))])))
			.unwrap();
		assert_eq!(fs::read_to_string(out.join("msg.txt")).unwrap(), "hi ops!");
	}

	#[test]
	fn helper_filters_behave() {
		let dir = tempfile::tempdir().unwrap();
		let r = renderer(&dir.path().join("tpl"), &dir.path().join("jinja"));
		let ctx = context(&vars(&[
			("csv", json!("a,b,c")),
			("xs", json!([1, 2, 2, 3])),
			("ys", json!([2, 3, 4])),
		]));

		assert_eq!(
			r.render_str("{{ csv | split(',') | to_json }}", &ctx).unwrap(),
			r#"["a","b","c"]"#
		);
		assert_eq!(
			r.render_str("{{ xs | unique | to_json }}", &ctx).unwrap(),
			"[1,2,3]"
		);
		assert_eq!(
			r.render_str("{{ xs | union(ys) | to_json }}", &ctx).unwrap(),
			"[1,2,3,4]"
		);
		assert_eq!(
			r.render_str("{{ xs | intersect(ys) | to_json }}", &ctx).unwrap(),
			"[2,3]"
		);
		assert_eq!(
			r.render_str("{{ xs | difference(ys) | to_json }}", &ctx).unwrap(),
			"[1]"
		);
		assert_eq!(
			r.render_str("{{ xs | symmetric_difference(ys) | to_json }}", &ctx)
				.unwrap(),
			"[1,4]"
		);
	}

	#[test]
	fn fatal_error_aborts_rendering() {
		let dir = tempfile::tempdir().unwrap();
		let r = renderer(&dir.path().join("tpl"), &dir.path().join("jinja"));
		let ctx = context(&Variables::default());
		let err = r
			.render_str("{{ fatal_error('broken config') }}", &ctx)
			.unwrap_err();
		assert!(err.to_string().contains("broken config"));
	}
}
