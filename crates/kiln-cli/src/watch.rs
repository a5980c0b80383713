//! Live console attachment.
//!
//! The consumer side of the rendezvous protocol: bind the socket named after
//! the build id, accept the supervisor's single connection, receive the pty
//! master over `SCM_RIGHTS`, and relay the stream to stdout until the
//! end-of-stream sentinel closes the live view.

use anyhow::{Context, Result};
use kiln_core::rendezvous_socket;
use kiln_proto::SentinelScanner;
use kiln_pty::recv_fd;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixListener;
use std::path::Path;
use tracing::{debug, info};

pub fn stream_build_log(socket_dir: &Path, build_id: &str) -> Result<()> {
    let socket_path = rendezvous_socket(socket_dir, build_id);
    let listener = bind_rendezvous(&socket_path)
        .with_context(|| format!("Failed to bind rendezvous socket {:?}", socket_path))?;
    info!(socket = %socket_path.display(), "waiting for the build job");

    let (stream, _) = listener.accept().context("rendezvous accept failed")?;
    let master = recv_fd(&stream).context("descriptor transfer failed")?;
    debug!("received pty master descriptor");

    // Single-use socket: one connect, one transfer.
    drop(listener);
    let _ = std::fs::remove_file(&socket_path);

    let mut master = File::from(master);
    let mut scanner = SentinelScanner::new();
    let mut stdout = io::stdout().lock();
    let mut buf = [0u8; 65536];
    loop {
        match master.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                stdout.write_all(&buf[..n])?;
                stdout.flush()?;
                if scanner.push(&buf[..n]) {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            // EIO means the job is gone along with its pty; the stream is over.
            Err(_) => break,
        }
    }
    Ok(())
}

/// Binds the socket, replacing a stale file left behind by an earlier
/// consumer of the same build id.
fn bind_rendezvous(path: &Path) -> io::Result<UnixListener> {
    match UnixListener::bind(path) {
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            debug!(socket = %path.display(), "removing old socket");
            std::fs::remove_file(path)?;
            UnixListener::bind(path)
        }
        other => other,
    }
}
