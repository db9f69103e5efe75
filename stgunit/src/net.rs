// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Minimal `SOCK_SEQPACKET` Unix sockets.
//!
//! The pipe transport relies on message boundaries, which seqpacket
//! sockets preserve; there is no internal length field on the wire.

use std::io;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::path::PathBuf;

// Returns `sockaddr_un` and its length for a given `path`.
fn sockaddr_un<P: AsRef<Path>>(path: P) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    let mut addr = libc::sockaddr_un {
        sun_family: libc::AF_UNIX as libc::sa_family_t,
        sun_path: [0; 108],
    };

    // The pathname must be NUL-terminated and fit in sun_path; the zeroed
    // initialization provides the terminator.
    let bytes = path.as_ref().as_os_str().as_bytes();
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path does not fit in sun_path",
        ));
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    let len = std::mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}

fn seqpacket_socket() -> io::Result<OwnedFd> {
    // SAFETY: socket returns a new fd or -1 and touches no memory.
    let fd = unsafe {
        libc::socket(
            libc::AF_UNIX,
            libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly created, owned descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// A bound, listening seqpacket socket. The socket file is removed when
/// the listener drops.
pub struct UnixSeqpacketListener {
    fd: OwnedFd,
    path: PathBuf,
}

impl UnixSeqpacketListener {
    pub fn bind<P: AsRef<Path>>(path: P) -> io::Result<UnixSeqpacketListener> {
        let path = path.as_ref().to_path_buf();
        // A stale socket file from a previous run blocks bind.
        let _ = std::fs::remove_file(&path);

        let fd = seqpacket_socket()?;
        let (addr, len) = sockaddr_un(&path)?;
        // SAFETY: addr is a valid sockaddr_un of the given length.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                len,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd is a bound socket.
        let ret = unsafe { libc::listen(fd.as_raw_fd(), 1) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(UnixSeqpacketListener { fd, path })
    }

    /// Accepts one peer. Unblocked with an error by [`Self::shutdown`].
    pub fn accept(&self) -> io::Result<UnixSeqpacket> {
        loop {
            // SAFETY: accept4 returns a new fd or -1 and touches no memory
            // (no peer address is requested).
            let fd = unsafe {
                libc::accept4(
                    self.fd.as_raw_fd(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    libc::SOCK_CLOEXEC,
                )
            };
            if fd >= 0 {
                // SAFETY: fd is a freshly accepted, owned descriptor.
                return Ok(UnixSeqpacket {
                    fd: unsafe { OwnedFd::from_raw_fd(fd) },
                });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Wakes a blocked [`Self::accept`] with an error.
    pub fn shutdown(&self) {
        // SAFETY: shutdown only operates on the fd.
        unsafe {
            libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_RDWR);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixSeqpacketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl AsRawFd for UnixSeqpacketListener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// One connected seqpacket endpoint.
pub struct UnixSeqpacket {
    fd: OwnedFd,
}

impl UnixSeqpacket {
    pub fn connect<P: AsRef<Path>>(path: P) -> io::Result<UnixSeqpacket> {
        let fd = seqpacket_socket()?;
        let (addr, len) = sockaddr_un(path)?;
        loop {
            // SAFETY: addr is a valid sockaddr_un of the given length.
            let ret = unsafe {
                libc::connect(
                    fd.as_raw_fd(),
                    &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                    len,
                )
            };
            if ret == 0 {
                return Ok(UnixSeqpacket { fd });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Sends one message.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            // SAFETY: buf is valid for len bytes for the duration of the
            // call.
            let ret = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Receives one message; zero means the peer closed or shut down.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: buf is valid for len bytes for the duration of the
            // call.
            let ret = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Wakes blocked sends and receives with end-of-stream.
    pub fn shutdown(&self) {
        // SAFETY: shutdown only operates on the fd.
        unsafe {
            libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_RDWR);
        }
    }
}

impl AsRawFd for UnixSeqpacket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn message_boundaries_are_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boundaries");
        let listener = UnixSeqpacketListener::bind(&path).unwrap();

        let client = {
            let path = path.clone();
            thread::spawn(move || {
                let socket = UnixSeqpacket::connect(&path).unwrap();
                socket.send(b"first").unwrap();
                socket.send(b"second message").unwrap();
            })
        };

        let server = listener.accept().unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(server.recv(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"first");
        assert_eq!(server.recv(&mut buf).unwrap(), 14);
        assert_eq!(&buf[..14], b"second message");
        client.join().unwrap();
    }

    #[test]
    fn shutdown_wakes_blocked_recv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shutdown");
        let listener = UnixSeqpacketListener::bind(&path).unwrap();
        let client = UnixSeqpacket::connect(&path).unwrap();
        let server = std::sync::Arc::new(listener.accept().unwrap());

        let receiver = {
            let server = std::sync::Arc::clone(&server);
            thread::spawn(move || {
                let mut buf = [0u8; 16];
                server.recv(&mut buf)
            })
        };
        thread::sleep(Duration::from_millis(20));
        server.shutdown();
        assert_eq!(receiver.join().unwrap().unwrap(), 0);
        drop(client);
    }

    #[test]
    fn listener_shutdown_fails_accept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accept");
        let listener = std::sync::Arc::new(UnixSeqpacketListener::bind(&path).unwrap());
        let acceptor = {
            let listener = std::sync::Arc::clone(&listener);
            thread::spawn(move || listener.accept().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        listener.shutdown();
        assert!(acceptor.join().unwrap().is_err());
    }

    #[test]
    fn socket_file_removed_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cleanup");
        let listener = UnixSeqpacketListener::bind(&path).unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }
}
