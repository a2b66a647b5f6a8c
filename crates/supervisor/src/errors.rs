use miette::Diagnostic;
use nix::errno::Errno;
use thiserror::Error;

/// Errors which prevent the init layer from starting at all.
///
/// Once the forwarding loop is running, nothing is recoverable by the
/// caller: the loop owns the process and converts the child's fate into an
/// exit status itself.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum LaunchError {
	/// The signal mask could not be installed.
	#[error("cannot block signals: {0}")]
	Mask(#[source] Errno),

	/// A signal handler could not be installed.
	#[error("cannot install handler for {signal}: {err}")]
	Handler {
		/// The signal concerned.
		signal: nix::sys::signal::Signal,

		/// The error which occurred.
		#[source]
		err: Errno,
	},

	/// The fork itself failed.
	#[error("cannot fork child: {0}")]
	Fork(#[source] Errno),
}
