//! Stage Launcher: fork, rewire stdin/stdout, exec.
//!
//! Everything the child needs is built before `fork`. Between fork and exec
//! the child only makes system calls and formats into stack buffers: no heap
//! allocation, no locks, no `tracing`. Another thread of the parent may have
//! held any of those at fork time, and the child would wait on it forever.

use std::ffi::CString;
use std::fmt::{self, Write as _};
use std::os::raw::c_char;
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::unistd::{self, ForkResult};
use tracing::Level;

use crate::channel::Channel;
use crate::error::{Error, ErrorCode, Result};
use crate::report::{CommandLine, StageLine};
use crate::stage::{StageDescriptor, StageRuntime};
use crate::sys::{self, RawLine};
use crate::{log_event, log_failure, policy};

/// NUL-terminated program name and argv, plus the null-terminated pointer
/// array `execvp` takes.
#[derive(Debug)]
pub struct ExecImage {
    program: CString,
    argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
}

impl ExecImage {
    pub fn new(stage: &StageDescriptor) -> Result<Self> {
        let to_cstring = |value: &str| {
            CString::new(value).map_err(|_| {
                Error::config_invalid_value(
                    "stages",
                    Some(value.to_string()),
                    format!("'{}' contains a NUL byte", value.escape_debug()),
                )
            })
        };

        let program = to_cstring(stage.name.as_str())?;
        let argv = stage
            .argv()
            .iter()
            .map(|arg| to_cstring(arg.as_str()))
            .collect::<Result<Vec<_>>>()?;
        // Points into the CString heap buffers, which stay put when `argv` moves.
        let argv_ptrs = argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        Ok(Self {
            program,
            argv,
            argv_ptrs,
        })
    }

    /// Replace the process image. Returns only on failure.
    fn exec(&self) -> Errno {
        // nix's execvp collects a new pointer array on every call; this one
        // was collected before fork.
        // SAFETY: `program` and every non-null `argv_ptrs` entry point into
        // CStrings owned by `self`, and the array ends with a null pointer.
        unsafe { libc::execvp(self.program.as_ptr(), self.argv_ptrs.as_ptr()) };
        Errno::last()
    }
}

/// Which child-side diagnostics the installed subscriber would accept,
/// sampled before fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChildLog {
    events: bool,
    failures: bool,
}

impl ChildLog {
    fn sample() -> Self {
        Self {
            events: tracing::enabled!(Level::INFO),
            failures: tracing::enabled!(Level::ERROR),
        }
    }

    fn event(self, line: u32, message: fmt::Arguments<'_>) {
        if self.events {
            emit(line, message);
        }
    }

    fn failure(self, line: u32, message: fmt::Arguments<'_>) {
        if self.failures {
            emit(line, message);
        }
    }
}

/// `[pid=N]:file:line: message`, written straight to fd 2.
fn emit(line: u32, message: fmt::Arguments<'_>) {
    let mut out = RawLine::new();
    // Overflow only truncates the line.
    let _ = write!(out, "[pid={}]:{}:{}: {}", sys::getpid(), file!(), line, message);
    out.write_to_stderr();
}

/// Everything the child side of one launch reads.
struct ChildPlan<'a> {
    stage: &'a StageDescriptor,
    position: usize,
    stdin_source: Option<RawFd>,
    output: Option<Channel>,
    argv: Vec<String>,
    image: ExecImage,
    log: ChildLog,
}

impl<'a> ChildPlan<'a> {
    fn new(
        stage: &'a StageDescriptor,
        position: usize,
        stdin_source: Option<RawFd>,
        output: Option<Channel>,
    ) -> Result<Self> {
        Ok(Self {
            stage,
            position,
            stdin_source,
            output,
            argv: stage.argv(),
            image: ExecImage::new(stage)?,
            log: ChildLog::sample(),
        })
    }

    fn command(&self) -> CommandLine<'_> {
        CommandLine {
            program: &self.stage.name,
            args: &self.argv,
        }
    }
}

/// Launch `stage` at `position` as a new process.
///
/// In the parent this returns at once with the child's runtime record. The
/// child rewires `stdin_source` onto fd 0 and the write end of `output` onto
/// fd 1, closes every channel end it does not use, then execs. `None` for
/// either side leaves the pipeline's own stdin/stdout in place.
pub fn launch<'a>(
    stage: &'a StageDescriptor,
    position: usize,
    stdin_source: Option<RawFd>,
    output: Option<Channel>,
) -> Result<StageRuntime<'a>> {
    let plan = ChildPlan::new(stage, position, stdin_source, output)?;

    // SAFETY: the child runs only `run_child`, which restricts itself to
    // system calls and stack formatting until exec or `_exit`.
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { child }) => {
            log_event!("FORK ==> {} (PARENT)", child);
            Ok(StageRuntime::new(stage, position, child.as_raw(), sys::getpid()))
        }
        Ok(ForkResult::Child) => run_child(&plan),
        Err(errno) => {
            log_failure!("fork: {} (errno = {})", errno.desc(), errno as i32);
            Err(Error::resource_exhausted("fork", errno))
        }
    }
}

fn run_child(plan: &ChildPlan<'_>) -> ! {
    let log = plan.log;
    log.event(line!(), format_args!("FORK ==> 0 (CHILD)"));
    log.event(
        line!(),
        format_args!(
            "{}",
            StageLine {
                position: plan.position,
                pid: sys::getpid(),
                ppid: sys::getppid(),
                command: &plan.command(),
            }
        ),
    );

    if let Err(errno) = rewire(plan.stdin_source, plan.output, log) {
        abort_stage(log, ErrorCode::StageRedirectFailed, errno, format_args!("redirect"));
    }

    if let Err(errno) = sys::reset_sigpipe() {
        log.failure(
            line!(),
            format_args!("signal(SIGPIPE, SIG_DFL): {}", errno.desc()),
        );
    }

    log.event(
        line!(),
        format_args!("EXEC({:?}, {:?})", plan.stage.name, plan.argv),
    );
    let errno = plan.image.exec();

    abort_stage(
        log,
        ErrorCode::StageLaunchFailed,
        errno,
        format_args!("exec({:?})", plan.stage.name),
    )
}

/// Terminate a forked stage that failed before exec. The supervisor sees the
/// exit status as that stage's abnormal completion.
fn abort_stage(log: ChildLog, code: ErrorCode, errno: Errno, what: fmt::Arguments<'_>) -> ! {
    let status = policy::stage_exit_code(code, errno);
    log.failure(
        line!(),
        format_args!(
            "{} failed: {} [{}], exiting with {}",
            what,
            errno.desc(),
            code.as_str(),
            status
        ),
    );
    sys::exit_immediately(status)
}

/// Child side of the descriptor hand-off. Descriptors already in place
/// (input on fd 0, output write end on fd 1) are left alone.
fn rewire(stdin_source: Option<RawFd>, output: Option<Channel>, log: ChildLog) -> nix::Result<()> {
    if let Some(input) = stdin_source.filter(|fd| *fd != sys::STDIN) {
        redirect(input, sys::STDIN, "input_fd", log)?;
        release(input, "input_fd", log);
    }

    if let Some(channel) = output {
        release(channel.read, "channel.read", log);
        if channel.write != sys::STDOUT {
            redirect(channel.write, sys::STDOUT, "channel.write", log)?;
            release(channel.write, "channel.write", log);
        }
    }

    Ok(())
}

fn redirect(fd: RawFd, target: RawFd, label: &str, log: ChildLog) -> nix::Result<()> {
    match unistd::dup2(fd, target) {
        Ok(_) => {
            log.event(line!(), format_args!("DUP({} ==> {}, {})", label, fd, target));
            Ok(())
        }
        Err(errno) => {
            log.failure(
                line!(),
                format_args!("DUP({} ==> {}, {}): {}", label, fd, target, errno.desc()),
            );
            Err(errno)
        }
    }
}

fn release(fd: RawFd, label: &str, log: ChildLog) {
    match unistd::close(fd) {
        Ok(()) => log.event(line!(), format_args!("CLOSE({} ==> {})", label, fd)),
        Err(errno) => log.failure(
            line!(),
            format_args!("CLOSE({} ==> {}): {}", label, fd, errno.desc()),
        ),
    }
}
