//! The PID 1 layer: fork the supervised child, then forward signals to it
//! and reap whatever the kernel re-parents to us until it exits.
//!
//! Everything here runs on one thread. Signals are blocked up front and
//! consumed synchronously with `sigwait`, so there is no handler-context
//! work at all: the only installed handler is a no-op (some kernels refuse
//! to `sigwait` an ignored signal), and every real decision happens in the
//! loop in [`supervise`].

use std::{io::IsTerminal, process::exit};

use nix::{
	errno::Errno,
	sys::signal::{
		kill, raise, sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow,
		Signal,
	},
	unistd::{fork, getpid, getsid, setsid, ForkResult, Pid},
};
use tracing::{debug, trace, warn};

use crate::{
	errors::LaunchError,
	reap::{self, ChildEnd},
	rewrite::Rewrites,
};

/// Options for [`launch`].
#[derive(Clone, Copy, Debug)]
pub struct Settings {
	/// Place the child in its own session and signal its whole process
	/// group, rather than the child pid alone.
	pub use_setsid: bool,
}

impl Default for Settings {
	fn default() -> Self {
		Self { use_setsid: true }
	}
}

/// Fork, and become an init process for the forked child.
///
/// Returns only in the child, with default signal dispositions, an empty
/// signal mask, and (unless [`Settings::use_setsid`] is off) a fresh session
/// with the controlling terminal taken over from the parent — ready for the
/// caller to exec the real command.
///
/// The parent never returns from here: it loops forwarding signals through
/// `rewrites` and reaping descendants, then exits with a status derived
/// from the child's own end.
pub fn launch(rewrites: Rewrites, settings: Settings) -> Result<(), LaunchError> {
	let mask = blockable_signals();
	sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).map_err(LaunchError::Mask)?;

	let action = SigAction::new(
		SigHandler::Handler(noop_handler),
		SaFlags::empty(),
		SigSet::empty(),
	);
	for sig in Signal::iterator() {
		if !mask.contains(sig) {
			continue;
		}
		unsafe { sigaction(sig, &action) }.map_err(|err| LaunchError::Handler { signal: sig, err })?;
	}

	// Orphaned descendants reparent to PID 1 on their own; under a nested
	// supervisor or a test harness they have to be claimed instead.
	#[cfg(target_os = "linux")]
	if unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) } < 0 {
		debug!(err=%Errno::last(), "cannot become child subreaper");
	}

	let mut ignores = OneTimeIgnores::default();

	// In setsid mode the child should end up as the session leader of our
	// terminal, so it can do normal job control. That means letting go of
	// the terminal here, before the fork.
	let hand_off_tty = settings.use_setsid && std::io::stdout().is_terminal();
	if hand_off_tty {
		detach_tty(&mut ignores);
	}

	match unsafe { fork() }.map_err(LaunchError::Fork)? {
		ForkResult::Child => {
			reset_signals();

			if settings.use_setsid {
				if let Err(err) = setsid() {
					warn!(%err, "cannot start new session, exiting");
					unsafe { libc::_exit(1) };
				}
				debug!("new session started");

				if hand_off_tty
					&& unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY, 0) } < 0
				{
					debug!(err=%Errno::last(), "cannot attach controlling terminal");
				}
			}

			Ok(())
		}
		ForkResult::Parent { child } => {
			debug!(pid=%child, "child spawned");
			supervise(
				Supervised {
					pid: child,
					rewrites,
					session_leader: settings.use_setsid,
					end: None,
				},
				mask,
				ignores,
			)
		}
	}
}

/// The supervised subprocess, as seen from the init loop.
#[derive(Debug)]
struct Supervised {
	pid: Pid,
	rewrites: Rewrites,
	session_leader: bool,
	end: Option<ChildEnd>,
}

impl Supervised {
	/// Forward a signal through the rewrite table, to the child's whole
	/// process group in setsid mode or to the child alone otherwise.
	///
	/// A vanished target is not an error: the signal simply raced the
	/// child's exit.
	fn forward(&self, sig: Signal) {
		let Some(out) = self.rewrites.translate(sig) else {
			debug!(signal=%sig, "not forwarding, rewritten to nothing");
			return;
		};

		let target = if self.session_leader {
			Pid::from_raw(-self.pid.as_raw())
		} else {
			self.pid
		};

		match kill(target, out) {
			Ok(()) => debug!(signal=%out, %target, "forwarded signal"),
			Err(Errno::ESRCH) => debug!(signal=%out, "no process left to forward to"),
			Err(err) => warn!(signal=%out, %err, "cannot forward signal"),
		}
	}
}

/// The forwarding and reaping loop. Runs until the supervised child has
/// been reaped, then exits the process.
fn supervise(mut child: Supervised, mask: SigSet, mut ignores: OneTimeIgnores) -> ! {
	loop {
		let sig = match mask.wait() {
			Ok(sig) => sig,
			Err(err) => {
				warn!(%err, "cannot wait for signals");
				continue;
			}
		};
		trace!(signal=%sig, "received signal");

		if ignores.is_ignored(sig) {
			debug!(signal=%sig, "ignoring terminal hand-off signal");
			continue;
		}

		if sig == Signal::SIGCHLD {
			if let Some(end) = reap::drain_zombies(child.pid) {
				child.end = Some(end);
			}
			if let Some(end) = child.end {
				// Tell whatever remains of the group to stop too, and pick
				// up anything that dies right away.
				child.forward(Signal::SIGTERM);
				reap::drain_zombies(child.pid);
				finish(end);
			}
		} else {
			child.forward(sig);

			if matches!(sig, Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU) {
				// Suspend alongside the group, whatever the rewrite target
				// was, so a later CONT from outside resumes child and
				// supervisor together.
				debug!("stopping self on job-control signal");
				if let Err(err) = raise(Signal::SIGSTOP) {
					warn!(%err, "cannot stop self");
				}
				debug!("resumed");
			}
		}
	}
}

/// Exit with the status the child's end implies.
///
/// For a signal termination, re-raise the same signal on ourselves with its
/// disposition restored, so our own termination reason is observable to our
/// parent; signals whose default does not terminate fall through to a plain
/// exit with the shell-convention status.
fn finish(end: ChildEnd) -> ! {
	debug!(status=%end.status(), "supervised child gone, leaving");

	if let ChildEnd::Signaled(sig) = end {
		let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
		let _ = unsafe { sigaction(sig, &action) };

		let mut set = SigSet::empty();
		set.add(sig);
		let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None);
		let _ = raise(sig);
	}

	exit(end.status())
}

/// Every signal we may block and wait on: all of them, bar the unblockable
/// pair and the synchronous faults, which must keep their native effect.
fn blockable_signals() -> SigSet {
	let mut set = SigSet::empty();
	for sig in Signal::iterator() {
		if matches!(
			sig,
			Signal::SIGKILL
				| Signal::SIGSTOP
				| Signal::SIGSEGV
				| Signal::SIGBUS
				| Signal::SIGFPE
				| Signal::SIGILL
		) {
			continue;
		}
		set.add(sig);
	}
	set
}

/// Put signal handling back the way a freshly-execed process expects it.
fn reset_signals() {
	let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
	for sig in Signal::iterator() {
		if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP) {
			continue;
		}
		let _ = unsafe { sigaction(sig, &action) };
	}
	let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
}

/// Let go of the controlling terminal so the child's new session can
/// acquire it.
///
/// If we were the session leader, the kernel answers the detach with a HUP
/// and a CONT to our group; those are ours, not the child's, and get
/// swallowed once each.
fn detach_tty(ignores: &mut OneTimeIgnores) {
	if unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCNOTTY) } < 0 {
		debug!(err=%Errno::last(), "cannot detach from controlling terminal");
		return;
	}

	match getsid(None) {
		Ok(sid) if sid == getpid() => {
			debug!("detached from controlling terminal, ignoring the first HUP and CONT");
			ignores.ignore_next(Signal::SIGHUP);
			ignores.ignore_next(Signal::SIGCONT);
		}
		_ => debug!("detached from controlling terminal, but was not session leader"),
	}
}

/// One-shot ignores covering the terminal hand-off quirk.
#[derive(Debug, Default)]
struct OneTimeIgnores(Vec<Signal>);

impl OneTimeIgnores {
	fn ignore_next(&mut self, sig: Signal) {
		self.0.push(sig);
	}

	fn is_ignored(&mut self, sig: Signal) -> bool {
		if let Some(pos) = self.0.iter().position(|s| *s == sig) {
			self.0.swap_remove(pos);
			true
		} else {
			false
		}
	}
}

extern "C" fn noop_handler(_: libc::c_int) {}

#[cfg(test)]
mod tests {
	use super::{blockable_signals, OneTimeIgnores};
	use nix::sys::signal::Signal;

	#[test]
	fn mask_spares_unblockables_and_faults() {
		let mask = blockable_signals();
		for sig in [
			Signal::SIGKILL,
			Signal::SIGSTOP,
			Signal::SIGSEGV,
			Signal::SIGBUS,
			Signal::SIGFPE,
			Signal::SIGILL,
		] {
			assert!(!mask.contains(sig), "{sig} must not be masked");
		}
	}

	#[test]
	fn mask_covers_forwardable_signals() {
		let mask = blockable_signals();
		for sig in [
			Signal::SIGHUP,
			Signal::SIGINT,
			Signal::SIGTERM,
			Signal::SIGQUIT,
			Signal::SIGCHLD,
			Signal::SIGTSTP,
			Signal::SIGTTIN,
			Signal::SIGTTOU,
			Signal::SIGUSR1,
			Signal::SIGUSR2,
		] {
			assert!(mask.contains(sig), "{sig} must be masked");
		}
	}

	#[test]
	fn one_time_ignores_fire_once() {
		let mut ignores = OneTimeIgnores::default();
		ignores.ignore_next(Signal::SIGHUP);
		assert!(ignores.is_ignored(Signal::SIGHUP));
		assert!(!ignores.is_ignored(Signal::SIGHUP));
		assert!(!ignores.is_ignored(Signal::SIGCONT));
	}
}
