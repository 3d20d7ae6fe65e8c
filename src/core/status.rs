//! Completion events and wait-status classification.

use nix::sys::wait::WaitStatus;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::sys::{self, Pid};

/// How a stage terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited { code: i32 },
    Signaled { signal: i32, core_dumped: bool },
    /// A wait status that is not a termination (`stopped`, `continued`,
    /// ptrace stops). `wait` without `WUNTRACED` does not produce these.
    Unknown { state: &'static str },
}

impl ExitStatus {
    pub fn from_wait_status(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => ExitStatus::Exited { code },
            WaitStatus::Signaled(_, signal, core_dumped) => ExitStatus::Signaled {
                signal: signal as i32,
                core_dumped,
            },
            WaitStatus::Stopped(..) => ExitStatus::Unknown { state: "stopped" },
            WaitStatus::Continued(_) => ExitStatus::Unknown { state: "continued" },
            WaitStatus::StillAlive => ExitStatus::Unknown {
                state: "still_alive",
            },
            #[allow(unreachable_patterns)]
            _ => ExitStatus::Unknown { state: "traced" },
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited { code: 0 })
    }

    /// Shell-style status: the exit code, or 128 + signal.
    pub fn shell_code(&self) -> i32 {
        match *self {
            ExitStatus::Exited { code } => code,
            ExitStatus::Signaled { signal, .. } => 128 + signal,
            ExitStatus::Unknown { .. } => 1,
        }
    }
}

/// One reaped child, consumed exactly once by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub pid: Pid,
    pub status: ExitStatus,
}

impl CompletionEvent {
    pub fn new(pid: Pid, status: ExitStatus) -> Self {
        Self { pid, status }
    }

    /// `None` for statuses that carry no pid (`StillAlive`).
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        status
            .pid()
            .map(|pid| Self::new(pid.as_raw(), ExitStatus::from_wait_status(status)))
    }
}

/// Block until any child terminates. `Ok(None)` once no children remain.
pub fn wait_any() -> Result<Option<CompletionEvent>> {
    match sys::reap().map_err(Error::wait_failed)? {
        Some(status) => CompletionEvent::from_wait_status(status)
            .map(Some)
            .ok_or_else(|| Error::internal_unexpected("wait returned a status without a pid")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid as NixPid;

    fn decode(raw: i32) -> ExitStatus {
        ExitStatus::from_wait_status(WaitStatus::from_raw(NixPid::from_raw(1), raw).unwrap())
    }

    #[test]
    fn decodes_normal_exit() {
        assert_eq!(decode(0), ExitStatus::Exited { code: 0 });
        assert_eq!(decode(3 << 8), ExitStatus::Exited { code: 3 });
        assert_eq!(decode(127 << 8), ExitStatus::Exited { code: 127 });
    }

    #[test]
    fn decodes_signal_termination() {
        assert_eq!(
            decode(libc::SIGTERM),
            ExitStatus::Signaled {
                signal: libc::SIGTERM,
                core_dumped: false
            }
        );
    }

    #[test]
    fn decodes_core_dump_flag() {
        assert_eq!(
            decode(libc::SIGSEGV | 0x80),
            ExitStatus::Signaled {
                signal: libc::SIGSEGV,
                core_dumped: true
            }
        );
    }

    #[test]
    fn stopped_status_is_unknown() {
        assert_eq!(
            decode((libc::SIGSTOP << 8) | 0x7f),
            ExitStatus::Unknown { state: "stopped" }
        );
    }

    #[test]
    fn completion_event_takes_pid_from_wait_status() {
        let event = CompletionEvent::from_wait_status(WaitStatus::Signaled(
            NixPid::from_raw(321),
            Signal::SIGKILL,
            false,
        ))
        .unwrap();

        assert_eq!(event.pid, 321);
        assert_eq!(event.status.shell_code(), 128 + libc::SIGKILL);
        assert_eq!(CompletionEvent::from_wait_status(WaitStatus::StillAlive), None);
    }

    #[test]
    fn only_zero_exit_is_success() {
        assert!(ExitStatus::Exited { code: 0 }.success());
        assert!(!ExitStatus::Exited { code: 1 }.success());
        assert!(!ExitStatus::Signaled {
            signal: libc::SIGPIPE,
            core_dumped: false
        }
        .success());
    }

    #[test]
    fn shell_code_adds_128_for_signals() {
        let killed = ExitStatus::Signaled {
            signal: libc::SIGKILL,
            core_dumped: false,
        };
        assert_eq!(killed.shell_code(), 128 + libc::SIGKILL);
        assert_eq!(ExitStatus::Exited { code: 4 }.shell_code(), 4);
    }

    #[test]
    fn status_serializes_with_kind_tag() {
        let json = serde_json::to_value(ExitStatus::Exited { code: 2 }).unwrap();
        assert_eq!(json["kind"], "exited");
        assert_eq!(json["code"], 2);
    }
}
