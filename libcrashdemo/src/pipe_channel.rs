use std::os::fd::{AsFd, AsRawFd, OwnedFd};
/////////////////////////////////////////
use anyhow::{Context, Result};

use nix::errno::Errno;
use nix::fcntl::OFlag;

pub struct ReadPort {
    fd: OwnedFd,
}

pub struct WritePort {
    fd: OwnedFd,
}

pub fn create_pipe_channel(close_on_exec: bool) -> Result<(ReadPort, WritePort)> {
    let (read_fd, write_fd) = nix::unistd::pipe2(if close_on_exec {
        OFlag::O_CLOEXEC
    } else {
        OFlag::empty()
    })
    .context("Failed to create pipe")?;

    Ok((ReadPort { fd: read_fd }, WritePort { fd: write_fd }))
}

impl ReadPort {
    pub fn read_into_buffer(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match nix::unistd::read(self.fd.as_fd(), buf) {
                Err(Errno::EINTR) => continue,
                result => return result.context("Failed to read from pipe"),
            }
        }
    }

    /// Reads until every write end of the pipe has been closed.
    pub fn read_to_end(&self) -> Result<Vec<u8>> {
        let mut contents = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let bytes_read = self.read_into_buffer(&mut buf)?;
            if bytes_read == 0 {
                return Ok(contents);
            }
            contents.extend_from_slice(&buf[..bytes_read]);
        }
    }
}

impl WritePort {
    pub fn write_from_buffer(&self, buf: &[u8]) -> Result<usize> {
        let bytes_written = nix::unistd::write(&self.fd, buf).context("Failed to write to pipe")?;
        Ok(bytes_written)
    }

    /// Makes this port the standard output of the calling process. The duplicate does not
    /// inherit close-on-exec, so it survives an `exec`.
    pub fn redirect_to_stdout(&self) -> Result<()> {
        // Safety: both descriptors are valid for the duration of the call.
        let result = unsafe { libc::dup2(self.fd.as_raw_fd(), libc::STDOUT_FILENO) };
        Errno::result(result).context("Failed to redirect stdout to pipe")?;
        Ok(())
    }
}
