//! Anonymous one-way byte channel used to relay launch errors from the
//! forked child back to the parent before exec.

use crate::error::{LdbgError, LdbgResult};
use nix::fcntl::OFlag;
use nix::unistd;
use std::mem;
use std::os::unix::io::RawFd;

const READ_FD: usize = 0;
const WRITE_FD: usize = 1;

/// A kernel pipe pair with guaranteed close of both descriptors on drop.
///
/// Close-on-exec must be decided at creation (`pipe2`), not afterwards, so
/// a concurrent exec can never inherit a half-configured descriptor.
pub struct Pipe {
    fds: [RawFd; 2],
}

impl Pipe {
    pub fn new(close_on_exec: bool) -> LdbgResult<Self> {
        let flags = if close_on_exec {
            OFlag::O_CLOEXEC
        } else {
            OFlag::empty()
        };
        let fds = unistd::pipe2(flags)
            .map_err(|e| LdbgError::errno("Pipe creation failed", e))?;
        Ok(Pipe {
            fds: [fds.0, fds.1],
        })
    }

    #[inline]
    pub fn read_fd(&self) -> RawFd {
        self.fds[READ_FD]
    }

    #[inline]
    pub fn write_fd(&self) -> RawFd {
        self.fds[WRITE_FD]
    }

    /// Give up ownership of the read end; the stored descriptor becomes -1.
    pub fn release_read(&mut self) -> RawFd {
        mem::replace(&mut self.fds[READ_FD], -1)
    }

    /// Give up ownership of the write end; the stored descriptor becomes -1.
    pub fn release_write(&mut self) -> RawFd {
        mem::replace(&mut self.fds[WRITE_FD], -1)
    }

    pub fn close_read(&mut self) {
        if self.fds[READ_FD] != -1 {
            let _ = unistd::close(self.fds[READ_FD]);
            self.fds[READ_FD] = -1;
        }
    }

    pub fn close_write(&mut self) {
        if self.fds[WRITE_FD] != -1 {
            let _ = unistd::close(self.fds[WRITE_FD]);
            self.fds[WRITE_FD] = -1;
        }
    }

    /// Blocking read of at most 1 KiB. An empty result means the write end
    /// was closed without data.
    pub fn read(&self) -> LdbgResult<Vec<u8>> {
        let mut buf = [0u8; 1024];
        let n = unistd::read(self.fds[READ_FD], &mut buf)
            .map_err(|e| LdbgError::errno("Could not read from pipe", e))?;
        Ok(buf[..n].to_vec())
    }

    /// Blocking write of the whole buffer; anything short of that is an
    /// error.
    pub fn write(&self, data: &[u8]) -> LdbgResult<()> {
        let n = unistd::write(self.fds[WRITE_FD], data)
            .map_err(|e| LdbgError::errno("Could not write to pipe", e))?;
        if n != data.len() {
            return Err(LdbgError::Kernel("short write to pipe".to_string()));
        }
        Ok(())
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.close_read();
        self.close_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let pipe = Pipe::new(false).unwrap();
        pipe.write(b"exec failed: sentinel").unwrap();
        assert_eq!(pipe.read().unwrap(), b"exec failed: sentinel");
    }

    #[test]
    fn read_after_writer_closed_is_empty() {
        let mut pipe = Pipe::new(true).unwrap();
        pipe.close_write();
        assert!(pipe.read().unwrap().is_empty());
    }

    #[test]
    fn release_clears_stored_fd() {
        let mut pipe = Pipe::new(false).unwrap();
        let fd = pipe.release_write();
        assert_ne!(fd, -1);
        assert_eq!(pipe.write_fd(), -1);
        let _ = nix::unistd::close(fd);
    }
}
