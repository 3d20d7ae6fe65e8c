//! Signal number to name/description lookup, for display only.

use std::os::raw::c_int;

use nix::sys::signal::Signal;

pub const UNKNOWN_SIGNAL: &str = "UNKNOWN SIGNAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEntry {
    pub number: c_int,
    pub name: &'static str,
    pub description: &'static str,
}

fn description(signal: Signal) -> &'static str {
    match signal {
        Signal::SIGHUP => "Hangup",
        Signal::SIGINT => "Interrupt",
        Signal::SIGQUIT => "Quit",
        Signal::SIGILL => "Illegal instruction",
        Signal::SIGTRAP => "Trace/breakpoint trap",
        Signal::SIGABRT => "Aborted",
        Signal::SIGBUS => "Bus error",
        Signal::SIGFPE => "Floating point exception",
        Signal::SIGKILL => "Killed",
        Signal::SIGUSR1 => "User defined signal 1",
        Signal::SIGSEGV => "Segmentation fault",
        Signal::SIGUSR2 => "User defined signal 2",
        Signal::SIGPIPE => "Broken pipe",
        Signal::SIGALRM => "Alarm clock",
        Signal::SIGTERM => "Terminated",
        Signal::SIGCHLD => "Child exited",
        Signal::SIGCONT => "Continued",
        Signal::SIGSTOP => "Stopped (signal)",
        Signal::SIGTSTP => "Stopped",
        Signal::SIGTTIN => "Stopped (tty input)",
        Signal::SIGTTOU => "Stopped (tty output)",
        Signal::SIGURG => "Urgent I/O condition",
        Signal::SIGXCPU => "CPU time limit exceeded",
        Signal::SIGXFSZ => "File size limit exceeded",
        Signal::SIGVTALRM => "Virtual timer expired",
        Signal::SIGPROF => "Profiling timer expired",
        Signal::SIGWINCH => "Window changed",
        Signal::SIGIO => "I/O possible",
        Signal::SIGSYS => "Bad system call",
        // Platform-specific signals (SIGSTKFLT, SIGPWR, SIGEMT, SIGINFO)
        #[allow(unreachable_patterns)]
        other => platform_description(other),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn platform_description(signal: Signal) -> &'static str {
    match signal {
        Signal::SIGPWR => "Power failure",
        #[cfg(not(any(
            target_arch = "mips",
            target_arch = "mips32r6",
            target_arch = "mips64",
            target_arch = "mips64r6",
            target_arch = "sparc64"
        )))]
        Signal::SIGSTKFLT => "Stack fault",
        other => other.as_str(),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn platform_description(signal: Signal) -> &'static str {
    signal.as_str()
}

pub fn lookup(signal: c_int) -> Option<SignalEntry> {
    let known = Signal::try_from(signal).ok()?;
    Some(SignalEntry {
        number: known as c_int,
        name: known.as_str(),
        description: description(known),
    })
}

/// `"SIGTERM-15: Terminated"`, or `UNKNOWN SIGNAL` for numbers the platform
/// does not define.
pub fn describe(signal: c_int) -> String {
    match lookup(signal) {
        Some(entry) => format!("{}-{}: {}", entry.name, entry.number, entry.description),
        None => UNKNOWN_SIGNAL.to_string(),
    }
}
