//! Process-level helpers on top of `nix`.
//!
//! Pids stay raw `pid_t` in runtime records and reports; conversion to
//! `nix::unistd::Pid` happens at the call sites that talk to the OS.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{self, WaitStatus};
use nix::unistd;

pub type Pid = libc::pid_t;

pub const STDIN: RawFd = libc::STDIN_FILENO;
pub const STDOUT: RawFd = libc::STDOUT_FILENO;

pub fn getpid() -> Pid {
    unistd::getpid().as_raw()
}

pub fn getppid() -> Pid {
    unistd::getppid().as_raw()
}

/// Block until any child terminates. `Ok(None)` once no children remain.
pub fn reap() -> nix::Result<Option<WaitStatus>> {
    reap_with(wait::wait)
}

fn reap_with(
    mut wait: impl FnMut() -> nix::Result<WaitStatus>,
) -> nix::Result<Option<WaitStatus>> {
    loop {
        match wait() {
            Ok(status) => return Ok(Some(status)),
            Err(Errno::ECHILD) => return Ok(None),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno),
        }
    }
}

/// Restore the default SIGPIPE action.
///
/// The Rust runtime ignores SIGPIPE, and ignored signals stay ignored across
/// exec; stages must see the default so writers die when readers go away.
pub fn reset_sigpipe() -> nix::Result<()> {
    // SAFETY: SIG_DFL installs no handler code.
    unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) }.map(drop)
}

/// Terminate without running exit handlers or flushing inherited buffers.
pub fn exit_immediately(code: i32) -> ! {
    // SAFETY: _exit never returns and has no preconditions.
    unsafe { libc::_exit(code) }
}

pub(crate) const RAW_LINE_CAPACITY: usize = 1024;

/// One diagnostic line formatted on the stack and written to fd 2 with a
/// single `write(2)` loop.
///
/// This is the only output a forked stage produces before exec: it takes no
/// lock and does not allocate. Text past the capacity is dropped and the
/// line still ends with a newline.
pub(crate) struct RawLine {
    buf: [u8; RAW_LINE_CAPACITY],
    len: usize,
}

impl RawLine {
    pub(crate) fn new() -> Self {
        Self {
            buf: [0; RAW_LINE_CAPACITY],
            len: 0,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn terminate(&mut self) {
        if self.len == RAW_LINE_CAPACITY {
            self.buf[RAW_LINE_CAPACITY - 1] = b'\n';
        } else if self.len == 0 || self.buf[self.len - 1] != b'\n' {
            self.buf[self.len] = b'\n';
            self.len += 1;
        }
    }

    pub(crate) fn write_to_stderr(mut self) {
        self.terminate();
        let line = self.as_bytes();
        let mut written = 0;
        while written < line.len() {
            match unistd::write(io::stderr(), &line[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }
}

impl fmt::Write for RawLine {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = RAW_LINE_CAPACITY - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}
