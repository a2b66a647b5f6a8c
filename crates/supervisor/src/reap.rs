//! Zombie reaping for the init loop.

use nix::{
	errno::Errno,
	sys::{
		signal::Signal,
		wait::{waitpid, WaitPidFlag, WaitStatus},
	},
	unistd::Pid,
};
use tracing::{debug, warn};

/// How the supervised child ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildEnd {
	/// Normal exit with this code.
	Exited(i32),

	/// Terminated by this signal.
	Signaled(Signal),
}

impl ChildEnd {
	/// The exit status the supervisor reports for this end, following shell
	/// convention for signal terminations.
	#[must_use]
	pub fn status(self) -> i32 {
		match self {
			Self::Exited(code) => code,
			Self::Signaled(sig) => 128 + sig as i32,
		}
	}
}

/// Reap every descendant the kernel has ready for us.
///
/// Loops a non-blocking wait until nothing reapable remains. Orphans
/// re-parented to us are discarded after reaping; only the supervised
/// child's status is of interest, and it is returned if it was among the
/// reaped. `ECHILD` means there are no children left at all and is not an
/// error here.
pub(crate) fn drain_zombies(supervised: Pid) -> Option<ChildEnd> {
	let mut end = None;

	loop {
		match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
			Ok(WaitStatus::Exited(pid, code)) => {
				debug!(%pid, %code, "reaped exited child");
				if pid == supervised {
					end = Some(ChildEnd::Exited(code));
				}
			}
			Ok(WaitStatus::Signaled(pid, sig, _)) => {
				debug!(%pid, signal=%sig, "reaped signalled child");
				if pid == supervised {
					end = Some(ChildEnd::Signaled(sig));
				}
			}
			Ok(WaitStatus::StillAlive) => break,
			Ok(status) => {
				debug!(?status, "ignoring non-terminal wait status");
			}
			Err(Errno::ECHILD) => break,
			Err(Errno::EINTR) => continue,
			Err(err) => {
				warn!(%err, "wait failed, stopping this reap pass");
				break;
			}
		}
	}

	end
}

#[cfg(test)]
mod tests {
	use super::{drain_zombies, ChildEnd};
	use nix::{
		sys::signal::{kill, Signal},
		unistd::Pid,
	};
	use std::{fs, process::Command, thread::sleep, time::Duration};

	fn drain_until(supervised: Pid) -> Option<ChildEnd> {
		for _ in 0..100 {
			if let Some(end) = drain_zombies(supervised) {
				return Some(end);
			}
			sleep(Duration::from_millis(50));
		}
		None
	}

	fn is_zombie(pid: u32) -> bool {
		fs::read_to_string(format!("/proc/{pid}/stat"))
			.map_or(false, |stat| stat.contains(") Z"))
	}

	// One test on purpose: the drain waits on every child of this process,
	// so concurrent spawning tests would steal each other's zombies.
	#[test]
	fn drains_every_zombie_and_reports_the_supervised_child() {
		let sibling = Command::new("true").spawn().expect("spawn sibling");
		let supervised = Command::new("sh")
			.args(["-c", "exit 7"])
			.spawn()
			.expect("spawn child");
		let supervised_pid = Pid::from_raw(supervised.id() as i32);

		assert_eq!(drain_until(supervised_pid), Some(ChildEnd::Exited(7)));

		// the unrelated sibling is collected too, not left a zombie
		sleep(Duration::from_millis(200));
		drain_zombies(supervised_pid);
		assert!(!is_zombie(sibling.id()));

		// signal terminations are reported as such
		let killed = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
		let killed_pid = Pid::from_raw(killed.id() as i32);
		kill(killed_pid, Signal::SIGKILL).expect("kill sleep");
		assert_eq!(
			drain_until(killed_pid),
			Some(ChildEnd::Signaled(Signal::SIGKILL))
		);

		// nothing reapable remains, and that is not an error
		assert_eq!(drain_zombies(supervised_pid), None);
	}
}
