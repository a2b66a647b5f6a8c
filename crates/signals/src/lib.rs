//! Signal name support for the entrypoint supervisor.
//!
//! Signals on the command line are always written by name, never by number:
//! a rewrite rule like `term:quit` reads the same on every architecture,
//! while `15:3` would not. Parsing is case-insensitive and the `SIG` prefix
//! is optional, so `term`, `TERM`, `SigTerm`, and `SIGTERM` all name the
//! same signal.

use std::str::FromStr;

use nix::sys::signal::Signal;

/// Parse a signal name into a [`Signal`].
///
/// Accepts the short name (`INT`, `HUP`, `USR1`) or the long name (`SIGINT`,
/// `SIGHUP`, `SIGUSR1`), in any case. Numeric input is rejected.
///
/// ```
/// use nix::sys::signal::Signal;
/// assert_eq!(entrypoint_signals::parse("hup").unwrap(), Signal::SIGHUP);
/// assert_eq!(entrypoint_signals::parse("SIGINT").unwrap(), Signal::SIGINT);
/// assert_eq!(entrypoint_signals::parse("Kill").unwrap(), Signal::SIGKILL);
/// assert!(entrypoint_signals::parse("15").is_err());
/// ```
pub fn parse(s: &str) -> Result<Signal, SignalParseError> {
	if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
		return Err(SignalParseError::new(
			s,
			"signal numbers are not accepted, use the name",
		));
	}

	let upper = s.to_ascii_uppercase();
	Signal::from_str(&upper)
		.or_else(|_| Signal::from_str(&format!("SIG{upper}")))
		.map_err(|_| SignalParseError::new(s, "unknown signal name"))
}

/// Error when parsing a signal from string.
#[derive(Debug, miette::Diagnostic, thiserror::Error)]
#[error("invalid signal `{src}`: {err}")]
pub struct SignalParseError {
	// The string that was parsed.
	#[source_code]
	src: String,

	// The error that occurred.
	err: String,

	// The span of the source which is in error.
	#[label = "invalid signal"]
	span: (usize, usize),
}

impl SignalParseError {
	#[must_use]
	pub fn new(src: &str, err: &str) -> Self {
		Self {
			src: src.to_owned(),
			err: err.to_owned(),
			span: (0, src.len()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::parse;
	use nix::sys::signal::Signal;

	#[test]
	fn short_and_long_names() {
		assert_eq!(parse("TERM").unwrap(), Signal::SIGTERM);
		assert_eq!(parse("SIGTERM").unwrap(), Signal::SIGTERM);
		assert_eq!(parse("usr1").unwrap(), Signal::SIGUSR1);
		assert_eq!(parse("SIGUSR1").unwrap(), Signal::SIGUSR1);
	}

	#[test]
	fn case_insensitive() {
		assert_eq!(parse("term").unwrap(), Signal::SIGTERM);
		assert_eq!(parse("TsTp").unwrap(), Signal::SIGTSTP);
		assert_eq!(parse("sIgQuIt").unwrap(), Signal::SIGQUIT);
	}

	#[test]
	fn numbers_rejected() {
		assert!(parse("15").is_err());
		assert!(parse("9").is_err());
		assert!(parse("0").is_err());
	}

	#[test]
	fn unknown_names_rejected() {
		assert!(parse("").is_err());
		assert!(parse("SIGNOPE").is_err());
		assert!(parse("none").is_err());
		assert!(parse("SIG").is_err());
	}
}
