//! Reporting and diagnostics.
//!
//! Pure observers: everything here reads runtime records and events and
//! renders them, without touching supervisor state.

use serde::Serialize;
use std::fmt;

use crate::channel::Channel;
use crate::signals;
use crate::stage::StageRuntime;
use crate::status::{CompletionEvent, ExitStatus};
use crate::supervisor::PipelineOutcome;
use crate::sys::Pid;
use crate::log_event;

/// Descriptive fields of one launched stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
    pub position: usize,
    pub pid: Pid,
    pub ppid: Pid,
    pub program: String,
    pub args: Vec<String>,
}

/// `program = "echo": args = ["echo", "hello"]`
#[derive(Debug, Clone, Copy)]
pub struct CommandLine<'a> {
    pub program: &'a str,
    pub args: &'a [String],
}

impl fmt::Display for CommandLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program = {:?}: args = {:?}", self.program, self.args)
    }
}

/// `0: pid = 10, ppid = 1, <command>`. Formatting it does not allocate, so
/// forked stages render it too.
#[derive(Clone, Copy)]
pub struct StageLine<'a> {
    pub position: usize,
    pub pid: Pid,
    pub ppid: Pid,
    pub command: &'a dyn fmt::Display,
}

impl fmt::Display for StageLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: pid = {}, ppid = {}, {}",
            self.position, self.pid, self.ppid, self.command
        )
    }
}

impl fmt::Display for StageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = StageLine {
            position: self.position,
            pid: self.pid,
            ppid: self.ppid,
            command: &CommandLine {
                program: &self.program,
                args: &self.args,
            },
        };
        fmt::Display::fmt(&line, f)
    }
}

pub fn describe_stage(runtime: &StageRuntime<'_>) -> StageInfo {
    StageInfo {
        position: runtime.position,
        pid: runtime.pid,
        ppid: runtime.ppid,
        program: runtime.descriptor.name.clone(),
        args: runtime.descriptor.argv(),
    }
}

pub fn log_stage(runtime: &StageRuntime<'_>) {
    log_event!("{}", describe_stage(runtime));
}

pub fn describe_status(status: &ExitStatus) -> String {
    match *status {
        ExitStatus::Exited { code } => format!("Exit STATUS = {}", code),
        ExitStatus::Signaled {
            signal,
            core_dumped,
        } => format!(
            "Child Killed by SIGNAL = {}{}",
            signals::describe(signal),
            if core_dumped { " (core dumped)" } else { "" }
        ),
        ExitStatus::Unknown { state } => format!("Unrecognized STATUS = {}", state),
    }
}

/// Render a reaped child. `runtime` is `None` when the pid matched no stage.
pub fn log_completion(event: &CompletionEvent, runtime: Option<&StageRuntime<'_>>) {
    log_event!("WAIT() ==> PID <== {}", event.pid);
    if let Some(runtime) = runtime {
        log_stage(runtime);
    }
    log_event!("{}", describe_status(&event.status));
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    #[serde(flatten)]
    pub info: StageInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExitStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Serializable summary of a finished pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown: Vec<CompletionEvent>,
    pub channels: Vec<Channel>,
    pub wait_calls: usize,
    pub all_succeeded: bool,
}

impl PipelineReport {
    pub fn from_outcome(outcome: &PipelineOutcome<'_>) -> Self {
        let stages = outcome
            .stages
            .iter()
            .map(|stage| StageReport {
                info: describe_stage(&stage.runtime),
                status: stage.status,
                summary: stage.status.as_ref().map(describe_status),
            })
            .collect();

        Self {
            stages,
            unknown: outcome.unknown.clone(),
            channels: outcome.channels.clone(),
            wait_calls: outcome.wait_calls,
            all_succeeded: outcome.all_succeeded(),
        }
    }
}
