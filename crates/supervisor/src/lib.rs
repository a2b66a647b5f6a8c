//! Entrypoint's PID 1 core.
//!
//! This crate implements the init side of the entrypoint: it forks the real
//! command, forwards incoming signals to it (optionally rewritten, to the
//! pid or to its whole session group), reaps every descendant the kernel
//! hands us, and turns the child's fate into our own exit status.
//!
//! It is deliberately synchronous and single-threaded: signals are masked
//! at startup and drained with `sigwait`, so the kernel's signal queue is
//! the only event source and there is nothing to race against.

pub mod rewrite;

mod errors;
mod init;
mod reap;

pub use errors::LaunchError;
pub use init::{launch, Settings};
pub use reap::ChildEnd;
