//! Signal rewrite rules and the translation table built from them.

use std::{collections::HashMap, fmt, str::FromStr};

use nix::sys::signal::Signal;

use entrypoint_signals::SignalParseError;

/// A single `FROM:TO` rewrite rule.
///
/// `TO` may be the special name `NONE`, in which case the incoming signal is
/// swallowed instead of forwarded. `NONE` is never valid on the `FROM` side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rewrite {
	/// The incoming signal.
	pub from: Signal,

	/// The outgoing signal, or `None` to drop the incoming one.
	pub to: Option<Signal>,
}

impl FromStr for Rewrite {
	type Err = RewriteParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut parts = s.splitn(2, ':');
		let (from, to) = match (parts.next(), parts.next()) {
			(Some(from), Some(to)) => (from, to),
			_ => return Err(RewriteParseError::Malformed(s.to_owned())),
		};

		let from = entrypoint_signals::parse(from)?;
		let to = if to.eq_ignore_ascii_case("none") {
			None
		} else {
			Some(entrypoint_signals::parse(to)?)
		};

		Ok(Self { from, to })
	}
}

impl fmt::Display for Rewrite {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.to {
			Some(to) => write!(f, "{}:{}", self.from, to),
			None => write!(f, "{}:NONE", self.from),
		}
	}
}

/// Error when parsing a rewrite rule from string.
#[derive(Debug, miette::Diagnostic, thiserror::Error)]
pub enum RewriteParseError {
	/// The rule is not of the form `FROM:TO`.
	#[error("invalid rewrite `{0}`: expected FROM:TO")]
	Malformed(String),

	/// Either side of the rule is not a signal name.
	#[error(transparent)]
	#[diagnostic(transparent)]
	BadSignalName(#[from] SignalParseError),
}

/// The signal translation table the supervisor forwards through.
///
/// Every deliverable signal translates to itself unless a rule says
/// otherwise; the table never needs to enumerate signals it does not touch.
/// Built once at startup and read-only from then on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rewrites {
	rules: HashMap<Signal, Option<Signal>>,
}

impl Rewrites {
	/// Build the translation table from user rules.
	///
	/// The job-control signals `TSTP`, `TTIN`, and `TTOU` default to `STOP`:
	/// the child runs in an orphaned process group, where the kernel
	/// suppresses default job-control behaviour, so forwarding them verbatim
	/// would do nothing. A user rule for the same signal overrides the
	/// default (e.g. `tstp:tstp` restores pass-through).
	#[must_use]
	pub fn build(rules: &[Rewrite]) -> Self {
		let mut map = HashMap::from([
			(Signal::SIGTSTP, Some(Signal::SIGSTOP)),
			(Signal::SIGTTIN, Some(Signal::SIGSTOP)),
			(Signal::SIGTTOU, Some(Signal::SIGSTOP)),
		]);

		for rule in rules {
			map.insert(rule.from, rule.to);
		}

		Self { rules: map }
	}

	/// Translate an incoming signal into the signal to forward.
	///
	/// Returns `None` when the signal is to be dropped.
	#[must_use]
	pub fn translate(&self, sig: Signal) -> Option<Signal> {
		self.rules.get(&sig).copied().unwrap_or(Some(sig))
	}
}
