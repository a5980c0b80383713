//! Descriptor transfer over local-domain sockets.
//!
//! The rendezvous protocol is a single message: the literal `b"ptyfd"`
//! payload with one descriptor attached as `SCM_RIGHTS` ancillary data.
//! No further bytes are defined on the connection.

use nix::cmsg_space;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// Carrier payload accompanying the descriptor.
pub const FD_CARRIER: &[u8] = b"ptyfd";

/// Sends one open descriptor to the peer of `sock`.
pub fn send_fd(sock: &UnixStream, fd: BorrowedFd<'_>) -> io::Result<()> {
    let iov = [IoSlice::new(FD_CARRIER)];
    let fds = [fd.as_raw_fd()];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    sendmsg::<()>(sock.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)?;
    Ok(())
}

/// Receives one descriptor from the peer of `sock`.
pub fn recv_fd(sock: &UnixStream) -> io::Result<OwnedFd> {
    let mut carrier = [0u8; FD_CARRIER.len()];
    let mut iov = [IoSliceMut::new(&mut carrier)];
    let mut cmsg_buffer = cmsg_space!([RawFd; 1]);

    let msg = recvmsg::<()>(
        sock.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buffer),
        MsgFlags::empty(),
    )?;
    for cmsg in msg.cmsgs()? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&fd) = fds.first() {
                // SAFETY: the kernel just installed this descriptor into our
                // table for us; nothing else owns it.
                return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "no descriptor in control message",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::AsFd;

    #[test]
    fn passes_a_live_descriptor_between_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        let file = File::create(&path).unwrap();

        let (left, right) = UnixStream::pair().unwrap();
        send_fd(&left, file.as_fd()).unwrap();

        let received = recv_fd(&right).unwrap();
        let mut via = File::from(received);
        via.write_all(b"over the wall").unwrap();
        drop(via);

        assert_eq!(std::fs::read(&path).unwrap(), b"over the wall");
    }

    #[test]
    fn recv_without_ancillary_data_is_an_error() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut left = left;
        left.write_all(FD_CARRIER).unwrap();
        assert!(recv_fd(&right).is_err());
    }
}
