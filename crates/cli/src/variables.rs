//! Collection of the template variable space.

use std::{
	collections::BTreeMap,
	env, fs,
	path::{Path, PathBuf},
};

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// The variable space handed to hooks and templates.
///
/// Seeded from the environment, then overlaid with the variables file (file
/// keys win). Mutable while prehooks run, then frozen for the rest of
/// initialization.
pub type Variables = BTreeMap<String, Value>;

/// Errors loading the variables file.
#[derive(Debug, Diagnostic, Error)]
pub enum VariablesError {
	/// An explicitly requested variables file does not exist.
	#[error("variables file {path:?} does not exist")]
	Missing {
		/// The requested path.
		path: PathBuf,
	},

	/// The variables path names a directory, usually a mismounted volume.
	#[error("variables file {path:?} is a directory, expected a YAML file")]
	IsDirectory {
		/// The requested path.
		path: PathBuf,
	},

	/// The file could not be read.
	#[error("cannot read variables file {path:?}")]
	Io {
		/// The requested path.
		path: PathBuf,

		/// The error which occurred.
		#[source]
		source: std::io::Error,
	},

	/// The file is not a YAML mapping with string keys.
	#[error("cannot parse variables file {path:?}: {reason}")]
	Parse {
		/// The requested path.
		path: PathBuf,

		/// What was wrong with it.
		reason: String,
	},
}

/// Build the variable space from the environment and the variables file.
///
/// When `explicit` is false (the path is the built-in default), a missing
/// file is fine and the environment alone is returned; an explicitly given
/// path must exist.
pub fn load(path: &Path, explicit: bool) -> Result<Variables, VariablesError> {
	let mut vars: Variables = env::vars().map(|(k, v)| (k, Value::String(v))).collect();

	if !path.exists() {
		if explicit {
			return Err(VariablesError::Missing {
				path: path.to_owned(),
			});
		}
		debug!(?path, "no variables file, continuing with the environment only");
		return Ok(vars);
	}

	if path.is_dir() {
		return Err(VariablesError::IsDirectory {
			path: path.to_owned(),
		});
	}

	let text = fs::read_to_string(path).map_err(|source| VariablesError::Io {
		path: path.to_owned(),
		source,
	})?;
	let doc: serde_yaml::Value =
		serde_yaml::from_str(&text).map_err(|err| VariablesError::Parse {
			path: path.to_owned(),
			reason: err.to_string(),
		})?;

	match doc {
		serde_yaml::Value::Null => debug!(?path, "variables file is empty"),
		serde_yaml::Value::Mapping(mapping) => {
			for (key, value) in mapping {
				let serde_yaml::Value::String(key) = key else {
					return Err(VariablesError::Parse {
						path: path.to_owned(),
						reason: format!("non-string key {key:?} at the top level"),
					});
				};
				let value = serde_json::to_value(&value).map_err(|err| VariablesError::Parse {
					path: path.to_owned(),
					reason: err.to_string(),
				})?;
				vars.insert(key, value);
			}
			debug!(?path, "variables file loaded");
		}
		_ => {
			return Err(VariablesError::Parse {
				path: path.to_owned(),
				reason: "the top level is not a mapping".into(),
			})
		}
	}

	Ok(vars)
}
