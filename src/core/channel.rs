//! Channel Allocator: one pipe per adjacent stage pair.

use nix::unistd;
use serde::Serialize;
use std::os::unix::io::{IntoRawFd, RawFd};

use crate::error::{Error, Result};
use crate::{log_event, log_failure};

/// A unidirectional byte pipe. Each end is owned by exactly one stage once
/// handed off; every other holder must release its copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub read: RawFd,
    pub write: RawFd,
}

/// Create a new channel. Refusal by the OS is fatal to the whole pipeline.
pub fn allocate() -> Result<Channel> {
    let (read, write) = unistd::pipe().map_err(|errno| {
        log_failure!("pipe: {} (errno = {})", errno.desc(), errno as i32);
        Error::resource_exhausted("pipe", errno)
    })?;

    // Ends are tracked as raw descriptors and closed explicitly by their holder.
    let channel = Channel {
        read: read.into_raw_fd(),
        write: write.into_raw_fd(),
    };
    log_event!("PIPE ==> {{{}, {}}}", channel.read, channel.write);
    Ok(channel)
}

/// Close a descriptor this process no longer needs.
///
/// A failed close leaves nothing to recover, so it is logged and otherwise ignored.
pub fn release(fd: RawFd, label: &str) {
    match unistd::close(fd) {
        Ok(()) => log_event!("CLOSE({} ==> {})", label, fd),
        Err(errno) => log_failure!("CLOSE({} ==> {}): {}", label, fd, errno.desc()),
    }
}
