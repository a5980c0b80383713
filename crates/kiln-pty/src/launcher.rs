//! Terminal-attached process launcher.
//!
//! [`PtyChild::spawn`] forks a child with a freshly allocated pseudo-terminal
//! as its controlling terminal. The child's first act is to raise SIGSTOP on
//! itself: the workspace it depends on is not guaranteed ready at fork time,
//! so it stays suspended until the supervisor releases it with SIGCONT, at
//! which point it execs the external builder. An exec failure has no error
//! channel back to the parent; it surfaces as exit status 127.
//!
//! The parent keeps both sides of the pty open for the lifetime of the
//! handle. Holding the slave means markers written to the master after the
//! child has exited still pass through the line discipline and reach a
//! consumer that holds a copy of the master, instead of erroring with EIO.

use nix::pty::openpty;
use nix::sys::signal::{self, Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::{CStr, CString, NulError};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::debug;

/// Errors launching the pty-attached child.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("pty allocation failed: {0}")]
    Pty(#[source] nix::Error),

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("NUL byte in command, environment, or working directory")]
    Nul(#[from] NulError),
}

/// A builder process suspended behind a pseudo-terminal.
///
/// The master descriptor is the only channel for observing or injecting the
/// job's output; the child is the sole user of the slave as its controlling
/// terminal.
#[derive(Debug)]
pub struct PtyChild {
    pid: Pid,
    master: OwnedFd,
    // Keeps the slave end alive in the parent; see the module docs.
    _slave: OwnedFd,
}

impl PtyChild {
    /// Forks a child attached to a new pty, suspended before exec.
    ///
    /// On release the child chdirs to `workdir` and execs `program` with
    /// `args` and exactly the environment given in `env`.
    pub fn spawn(
        program: &str,
        args: &[String],
        workdir: &Path,
        env: &[(String, String)],
    ) -> Result<Self, LaunchError> {
        // Everything the child needs is allocated up front: between fork and
        // exec only async-signal-safe calls are allowed.
        let prog = CString::new(program)?;
        let mut argv = vec![prog.clone()];
        for arg in args {
            argv.push(CString::new(arg.as_str())?);
        }
        let mut envp = Vec::with_capacity(env.len());
        for (key, value) in env {
            envp.push(CString::new(format!("{key}={value}"))?);
        }
        let workdir = CString::new(workdir.as_os_str().as_bytes())?;

        let pty = openpty(None, None).map_err(LaunchError::Pty)?;
        let master_raw = pty.master.as_raw_fd();
        let slave_raw = pty.slave.as_raw_fd();

        // SAFETY: the child branch only performs async-signal-safe calls
        // before exec/_exit; no allocation or locking happens after the fork.
        match unsafe { unistd::fork() }.map_err(LaunchError::Fork)? {
            ForkResult::Parent { child } => {
                debug!(pid = %child, "launched builder process, awaiting self-suspend");
                Ok(Self {
                    pid: child,
                    master: pty.master,
                    _slave: pty.slave,
                })
            }
            ForkResult::Child => {
                unsafe { libc::close(master_raw) };
                exec_in_pty(slave_raw, &workdir, &prog, &argv, &envp)
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The master side of the pty pair.
    pub fn master(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    /// Writes the full buffer into the pty master.
    pub fn write_master(&self, mut bytes: &[u8]) -> nix::Result<()> {
        while !bytes.is_empty() {
            match unistd::write(&self.master, bytes) {
                Ok(0) => return Err(nix::Error::EIO),
                Ok(n) => bytes = &bytes[n..],
                Err(nix::Error::EINTR) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Releases the suspended child.
    ///
    /// Blocks until the self-SIGSTOP is actually observed before sending
    /// SIGCONT, so the continue signal cannot outrun the child's suspend.
    /// Returns `Some(code)` if the child turned out to have terminated
    /// already (it has been reaped; do not call [`wait`](Self::wait)).
    pub fn release(&self) -> nix::Result<Option<i32>> {
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WUNTRACED))? {
                WaitStatus::Stopped(_, _) => break,
                WaitStatus::Exited(_, code) => return Ok(Some(code)),
                WaitStatus::Signaled(_, sig, _) => return Ok(Some(128 + sig as i32)),
                _ => {}
            }
        }
        kill(self.pid, Signal::SIGCONT)?;
        Ok(None)
    }

    /// Forcibly terminates the child, suspended or not. Idempotent.
    pub fn force_kill(&self) {
        // ESRCH just means it is already gone.
        let _ = kill(self.pid, Signal::SIGKILL);
    }

    /// Blocks until the child terminates and returns its outcome code:
    /// the exit status, or 128 plus the signal number for a signaled exit.
    pub fn wait(&self) -> nix::Result<i32> {
        loop {
            match waitpid(self.pid, None)? {
                WaitStatus::Exited(_, code) => return Ok(code),
                WaitStatus::Signaled(_, sig, _) => return Ok(128 + sig as i32),
                _ => {}
            }
        }
    }
}

impl AsFd for PtyChild {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }
}

/// Child-side setup between fork and exec. Never returns.
fn exec_in_pty(slave: RawFd, workdir: &CStr, prog: &CStr, argv: &[CString], envp: &[CString]) -> ! {
    // Suspend first: the parent only continues us once the workspace is
    // fully prepared.
    let _ = signal::raise(Signal::SIGSTOP);

    let _ = unistd::setsid();
    unsafe {
        libc::ioctl(slave, libc::TIOCSCTTY as libc::c_ulong, 0);
        libc::dup2(slave, 0);
        libc::dup2(slave, 1);
        libc::dup2(slave, 2);
        if slave > 2 {
            libc::close(slave);
        }
    }
    let _ = unistd::chdir(workdir);
    let _ = unistd::execvpe(prog, argv, envp);

    // No way to report the exec failure; the supervisor sees the status.
    unsafe { libc::_exit(127) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;

    fn spawn_sh(script: &str, workdir: &Path, env: &[(String, String)]) -> PtyChild {
        PtyChild::spawn(
            "/bin/sh",
            &["-c".to_string(), script.to_string()],
            workdir,
            env,
        )
        .unwrap()
    }

    #[test]
    fn release_then_wait_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let child = spawn_sh("exit 7", dir.path(), &[]);
        assert_eq!(child.release().unwrap(), None);
        assert_eq!(child.wait().unwrap(), 7);
    }

    #[test]
    fn kill_while_suspended_reports_signal() {
        let dir = tempfile::tempdir().unwrap();
        let child = spawn_sh("sleep 30", dir.path(), &[]);
        child.force_kill();
        assert_eq!(child.wait().unwrap(), 128 + libc::SIGKILL);
    }

    #[test]
    fn exec_failure_surfaces_as_status_127() {
        let dir = tempfile::tempdir().unwrap();
        let child = PtyChild::spawn("/definitely/not/a/builder", &[], dir.path(), &[]).unwrap();
        assert_eq!(child.release().unwrap(), None);
        assert_eq!(child.wait().unwrap(), 127);
    }

    #[test]
    fn child_gets_exactly_the_given_environment_and_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let env = vec![
            ("MARK".to_string(), "hello".to_string()),
            ("OUT".to_string(), out.display().to_string()),
        ];
        let child = spawn_sh(r#"printf '%s:%s' "$MARK" "$(pwd)" > "$OUT""#, dir.path(), &env);
        assert_eq!(child.release().unwrap(), None);
        assert_eq!(child.wait().unwrap(), 0);

        let expected = format!("hello:{}", dir.path().canonicalize().unwrap().display());
        assert_eq!(fs::read_to_string(&out).unwrap(), expected);
    }

    #[test]
    fn master_stays_writable_after_child_exit() {
        let dir = tempfile::tempdir().unwrap();
        let child = spawn_sh("exit 0", dir.path(), &[]);
        assert_eq!(child.release().unwrap(), None);
        assert_eq!(child.wait().unwrap(), 0);

        // The parent still holds the slave, so the write goes through the
        // line discipline and the echo comes back on the master.
        child.write_master(b"end-marker").unwrap();
        let mut master = std::fs::File::from(child.master().try_clone_to_owned().unwrap());
        let mut buf = [0u8; 64];
        let n = master.read(&mut buf).unwrap();
        assert!(
            String::from_utf8_lossy(&buf[..n]).contains("end-marker"),
            "echoed marker not observed"
        );
    }
}
