//! Descriptor handoff channel.
//!
//! Runs alongside the job from the moment the pty and process exist. It
//! keeps trying to connect to the job's rendezvous socket; once a consumer
//! listens, the pty master descriptor is transferred and the task ends. A
//! consumer that never appears costs nothing but the retry loop: connection
//! failures are never fatal to the job, and the supervisor cancels the
//! channel when it reaches a terminal state so nothing leaks.

use kiln_pty::send_fd;
use std::io;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fixed backoff between rendezvous connection attempts.
pub const HANDOFF_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the concurrently running handoff task.
pub struct HandoffChannel {
    handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

impl HandoffChannel {
    /// Spawns the retry loop for `socket_path`, transferring the descriptor
    /// behind `master` to whoever connects first.
    pub fn spawn<F>(socket_path: PathBuf, master: Arc<F>) -> Self
    where
        F: AsFd + Send + Sync + 'static,
    {
        let (cancel, mut cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = UnixStream::connect(&socket_path) => match result {
                        Ok(stream) => {
                            deliver(stream, master.as_ref());
                            return;
                        }
                        Err(e) => match e.kind() {
                            io::ErrorKind::NotFound => {
                                debug!(socket = %socket_path.display(), "rendezvous socket does not exist");
                            }
                            io::ErrorKind::ConnectionRefused => {
                                debug!(socket = %socket_path.display(), "connection refused");
                            }
                            _ => {
                                warn!(socket = %socket_path.display(), error = %e, "rendezvous connect failed");
                            }
                        },
                    },
                    _ = cancelled.changed() => return,
                }
                tokio::select! {
                    () = tokio::time::sleep(HANDOFF_RETRY_INTERVAL) => {}
                    _ = cancelled.changed() => return,
                }
            }
        });
        Self { handle, cancel }
    }

    /// Cancels the channel if it has not delivered yet and waits for the
    /// task to finish.
    pub async fn shutdown(self) {
        let _ = self.cancel.send(true);
        let _ = self.handle.await;
    }
}

fn deliver<F: AsFd>(stream: UnixStream, master: &F) {
    let stream = match stream.into_std() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "could not unwrap rendezvous stream");
            return;
        }
    };
    if let Err(e) = stream.set_nonblocking(false) {
        warn!(error = %e, "could not configure rendezvous stream");
        return;
    }
    match send_fd(&stream, master.as_fd()) {
        Ok(()) => info!("pty master descriptor handed off"),
        Err(e) => warn!(error = %e, "descriptor transfer failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_pty::recv_fd;
    use std::io::{Read, Write};
    use std::os::unix::net::{UnixListener, UnixStream as StdUnixStream};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delivers_the_descriptor_once_a_listener_appears() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("job-socket");

        // The descriptor under transfer: one half of a socketpair, so the
        // receiver can prove it got a live copy.
        let (mut ours, theirs) = StdUnixStream::pair().unwrap();
        let channel = HandoffChannel::spawn(socket_path.clone(), Arc::new(theirs));

        // Let the first connect attempt fail, then show up as the consumer.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let listener = UnixListener::bind(&socket_path).unwrap();
        let received = tokio::task::spawn_blocking(move || {
            let (stream, _) = listener.accept().unwrap();
            recv_fd(&stream).unwrap()
        })
        .await
        .unwrap();

        channel.shutdown().await;

        let mut via = StdUnixStream::from(received);
        via.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        ours.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn shutdown_cancels_an_undelivered_channel() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("nobody-listens");
        let payload = tempfile::tempfile().unwrap();

        let channel = HandoffChannel::spawn(socket_path, Arc::new(payload));
        tokio::time::timeout(Duration::from_secs(5), channel.shutdown())
            .await
            .expect("handoff task did not stop on cancellation");
    }
}
