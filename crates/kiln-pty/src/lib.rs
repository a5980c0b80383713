//! # kiln-pty
//!
//! OS integration for the kiln build runner:
//! - [`PtyChild`]: a process launched with a fresh pseudo-terminal as its
//!   controlling terminal, held suspended until explicitly released
//! - [`send_fd`]/[`recv_fd`]: descriptor transfer over local-domain sockets
//!   using `SCM_RIGHTS`

mod launcher;
mod sendfd;

pub use launcher::{LaunchError, PtyChild};
pub use sendfd::{FD_CARRIER, recv_fd, send_fd};
