//! Supervisor: builds the pipeline stage by stage, then reaps every stage.
//!
//! The OS side sits behind `StageHost` so the sequencing and descriptor
//! bookkeeping can be exercised without forking.

use std::os::unix::io::RawFd;

use serde::Serialize;

use crate::channel::{self, Channel};
use crate::error::{Error, Result};
use crate::stage::{StageDescriptor, StageRuntime, StageTable};
use crate::status::{self, CompletionEvent, ExitStatus};
use crate::{launcher, log_event, policy, report};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Allocating,
    Launching,
    Draining,
    Done,
}

/// Process and descriptor primitives the supervisor drives.
pub trait StageHost {
    fn allocate(&mut self) -> Result<Channel>;

    fn launch<'a>(
        &mut self,
        stage: &'a StageDescriptor,
        position: usize,
        stdin_source: Option<RawFd>,
        output: Option<Channel>,
    ) -> Result<StageRuntime<'a>>;

    fn release(&mut self, fd: RawFd, label: &str);

    /// Next completion, or `None` once no children remain.
    fn wait_any(&mut self) -> Result<Option<CompletionEvent>>;
}

/// Real pipes, forks and waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsHost;

impl StageHost for OsHost {
    fn allocate(&mut self) -> Result<Channel> {
        channel::allocate()
    }

    fn launch<'a>(
        &mut self,
        stage: &'a StageDescriptor,
        position: usize,
        stdin_source: Option<RawFd>,
        output: Option<Channel>,
    ) -> Result<StageRuntime<'a>> {
        launcher::launch(stage, position, stdin_source, output)
    }

    fn release(&mut self, fd: RawFd, label: &str) {
        channel::release(fd, label)
    }

    fn wait_any(&mut self) -> Result<Option<CompletionEvent>> {
        status::wait_any()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome<'a> {
    pub runtime: StageRuntime<'a>,
    /// `None` only if the stage was never reaped.
    pub status: Option<ExitStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome<'a> {
    pub stages: Vec<StageOutcome<'a>>,
    pub unknown: Vec<CompletionEvent>,
    pub channels: Vec<Channel>,
    /// Wait calls made while draining, including the final "no children" one.
    pub wait_calls: usize,
}

impl PipelineOutcome<'_> {
    pub fn all_succeeded(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.status.is_some_and(|status| status.success()))
    }

    /// Status of the rightmost stage that did not succeed, or 0.
    pub fn pipefail_code(&self) -> i32 {
        self.stages
            .iter()
            .rev()
            .find_map(|stage| match stage.status {
                Some(status) if status.success() => None,
                Some(status) => Some(status.shell_code()),
                None => Some(1),
            })
            .unwrap_or(0)
    }
}

pub struct Supervisor<'a, H: StageHost> {
    table: &'a StageTable,
    host: H,
    state: SupervisorState,
    runtimes: Vec<StageRuntime<'a>>,
    statuses: Vec<Option<ExitStatus>>,
    unknown: Vec<CompletionEvent>,
    channels: Vec<Channel>,
    wait_calls: usize,
}

impl<'a> Supervisor<'a, OsHost> {
    pub fn with_os(table: &'a StageTable) -> Self {
        Self::new(table, OsHost)
    }
}

impl<'a, H: StageHost> Supervisor<'a, H> {
    pub fn new(table: &'a StageTable, host: H) -> Self {
        Self {
            table,
            host,
            state: SupervisorState::Idle,
            runtimes: Vec::with_capacity(table.len()),
            statuses: Vec::with_capacity(table.len()),
            unknown: Vec::new(),
            channels: Vec::new(),
            wait_calls: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Launch every stage, then reap until no children remain.
    ///
    /// A supervisor runs its table once; later calls fail without launching.
    pub fn run(&mut self) -> Result<PipelineOutcome<'a>> {
        if self.state != SupervisorState::Idle {
            return Err(Error::already_run(self.state));
        }

        self.launch_all()?;
        self.drain()?;

        Ok(PipelineOutcome {
            stages: self
                .runtimes
                .iter()
                .zip(&self.statuses)
                .map(|(runtime, status)| StageOutcome {
                    runtime: *runtime,
                    status: *status,
                })
                .collect(),
            unknown: self.unknown.clone(),
            channels: self.channels.clone(),
            wait_calls: self.wait_calls,
        })
    }

    fn transition(&mut self, next: SupervisorState) {
        tracing::debug!(from = ?self.state, to = ?next, "supervisor state");
        self.state = next;
    }

    fn launch_all(&mut self) -> Result<()> {
        let table = self.table;
        let last = table.len().saturating_sub(1);
        let mut input_fd: Option<RawFd> = None;

        for (position, stage) in table.iter().enumerate() {
            let output = if position < last {
                self.transition(SupervisorState::Allocating);
                match self.host.allocate() {
                    Ok(channel) => {
                        self.channels.push(channel);
                        Some(channel)
                    }
                    Err(err) => {
                        self.release_input(input_fd);
                        return Err(err);
                    }
                }
            } else {
                None
            };

            self.transition(SupervisorState::Launching);
            let runtime = match self.host.launch(stage, position, input_fd, output) {
                Ok(runtime) => runtime,
                Err(err) => {
                    if let Some(channel) = output {
                        self.host.release(channel.write, "channel.write");
                        self.host.release(channel.read, "channel.read");
                    }
                    self.release_input(input_fd);
                    return Err(err);
                }
            };
            self.runtimes.push(runtime);
            self.statuses.push(None);

            // The parent never writes, and the previous input is superseded.
            if let Some(channel) = output {
                self.host.release(channel.write, "channel.write");
            }
            self.release_input(input_fd.take());
            input_fd = output.map(|channel| channel.read);
        }

        self.release_input(input_fd);
        Ok(())
    }

    fn release_input(&mut self, input_fd: Option<RawFd>) {
        if let Some(fd) = input_fd {
            self.host.release(fd, "input_fd");
        }
    }

    fn drain(&mut self) -> Result<()> {
        self.transition(SupervisorState::Draining);

        loop {
            self.wait_calls += 1;
            let Some(event) = self.host.wait_any()? else {
                break;
            };
            self.record(event)?;
        }

        self.transition(SupervisorState::Done);
        log_event!(
            "all {} stage(s) reaped after {} wait call(s)",
            self.runtimes.len(),
            self.wait_calls
        );
        Ok(())
    }

    fn record(&mut self, event: CompletionEvent) -> Result<()> {
        match self.runtimes.iter().position(|rt| rt.pid == event.pid) {
            Some(index) => {
                report::log_completion(&event, Some(&self.runtimes[index]));
                self.statuses[index] = Some(event.status);
                Ok(())
            }
            None => {
                report::log_completion(&event, None);
                self.unknown.push(event);
                policy::handle(Error::unknown_process(event.pid, event.status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::stage::StageDescriptor;
    use nix::errno::Errno;
    use std::collections::{BTreeSet, VecDeque};

    const EXITED_OK: ExitStatus = ExitStatus::Exited { code: 0 };

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Launched {
        position: usize,
        stdin_source: Option<RawFd>,
        output: Option<Channel>,
        /// Descriptors open in the parent at the moment of the launch.
        open_at_launch: BTreeSet<RawFd>,
    }

    /// Records every call and hands out fake descriptors and pids.
    #[derive(Debug, Default)]
    struct FakeHost {
        next_fd: RawFd,
        open: BTreeSet<RawFd>,
        allocations: usize,
        open_at_allocation: Vec<BTreeSet<RawFd>>,
        launched: Vec<Launched>,
        released: Vec<RawFd>,
        /// Positions in the order their completion is reported.
        exit_order: Vec<usize>,
        pending: VecDeque<CompletionEvent>,
        extra_events: Vec<CompletionEvent>,
        fail_allocation_at: Option<usize>,
        fail_launch_at: Option<usize>,
        fail_wait: bool,
        wait_calls: usize,
    }

    impl FakeHost {
        fn new() -> Self {
            Self {
                next_fd: 10,
                ..Default::default()
            }
        }

        fn pid_for(position: usize) -> i32 {
            1000 + position as i32
        }
    }

    impl StageHost for FakeHost {
        fn allocate(&mut self) -> Result<Channel> {
            if self.fail_allocation_at == Some(self.allocations) {
                return Err(Error::resource_exhausted("pipe", Errno::EMFILE));
            }
            self.open_at_allocation.push(self.open.clone());
            self.allocations += 1;

            let channel = Channel {
                read: self.next_fd,
                write: self.next_fd + 1,
            };
            self.next_fd += 2;
            self.open.insert(channel.read);
            self.open.insert(channel.write);
            Ok(channel)
        }

        fn launch<'a>(
            &mut self,
            stage: &'a StageDescriptor,
            position: usize,
            stdin_source: Option<RawFd>,
            output: Option<Channel>,
        ) -> Result<StageRuntime<'a>> {
            if self.fail_launch_at == Some(position) {
                return Err(Error::resource_exhausted("fork", Errno::EAGAIN));
            }
            self.launched.push(Launched {
                position,
                stdin_source,
                output,
                open_at_launch: self.open.clone(),
            });
            Ok(StageRuntime::new(stage, position, Self::pid_for(position), 1))
        }

        fn release(&mut self, fd: RawFd, _label: &str) {
            assert!(self.open.remove(&fd), "released fd {} twice or never opened", fd);
            self.released.push(fd);
        }

        fn wait_any(&mut self) -> Result<Option<CompletionEvent>> {
            self.wait_calls += 1;
            if self.fail_wait {
                return Err(Error::wait_failed(Errno::EINVAL));
            }
            if self.pending.is_empty() && self.wait_calls == 1 {
                for event in self.extra_events.drain(..) {
                    self.pending.push_back(event);
                }
                let order = if self.exit_order.is_empty() {
                    (0..self.launched.len()).collect()
                } else {
                    self.exit_order.clone()
                };
                for position in order {
                    self.pending
                        .push_back(CompletionEvent::new(Self::pid_for(position), EXITED_OK));
                }
            }
            Ok(self.pending.pop_front())
        }
    }

    fn table(n: usize) -> StageTable {
        StageTable::new(
            (0..n)
                .map(|i| StageDescriptor::new(format!("prog{}", i), [format!("--arg{}", i)]))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn single_stage_inherits_stdin_and_stdout() {
        let table = table(1);
        let mut supervisor = Supervisor::new(&table, FakeHost::new());
        let outcome = supervisor.run().unwrap();

        let host = &supervisor.host;
        assert_eq!(host.allocations, 0);
        assert_eq!(host.launched.len(), 1);
        assert_eq!(host.launched[0].stdin_source, None);
        assert_eq!(host.launched[0].output, None);
        assert_eq!(outcome.stages.len(), 1);
        assert_eq!(outcome.wait_calls, 2);
        assert_eq!(supervisor.state(), SupervisorState::Done);
    }

    #[test]
    fn allocates_one_channel_per_adjacent_pair() {
        for n in 1..=6 {
            let table = table(n);
            let mut supervisor = Supervisor::new(&table, FakeHost::new());
            let outcome = supervisor.run().unwrap();

            assert_eq!(supervisor.host.allocations, n - 1);
            assert_eq!(outcome.channels.len(), n - 1);
            assert_eq!(supervisor.host.launched.len(), n);
        }
    }

    #[test]
    fn each_stage_reads_from_the_previous_stage_channel() {
        let table = table(4);
        let mut supervisor = Supervisor::new(&table, FakeHost::new());
        supervisor.run().unwrap();

        let launched = &supervisor.host.launched;
        assert_eq!(launched[0].stdin_source, None);
        for pair in launched.windows(2) {
            let producer = pair[0].output.expect("producer has an output channel");
            assert_eq!(pair[1].stdin_source, Some(producer.read));
        }
        assert_eq!(launched[3].output, None);
        let positions: Vec<usize> = launched.iter().map(|l| l.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn at_most_one_inherited_descriptor_is_live_at_each_allocation() {
        let table = table(5);
        let mut supervisor = Supervisor::new(&table, FakeHost::new());
        supervisor.run().unwrap();

        let host = &supervisor.host;
        assert!(host.open_at_allocation[0].is_empty());
        for (i, open) in host.open_at_allocation.iter().enumerate().skip(1) {
            let retained = host.launched[i - 1].output.unwrap().read;
            assert_eq!(open, &BTreeSet::from([retained]), "allocation {}", i);
        }
    }

    #[test]
    fn stage_sees_only_its_own_descriptors_at_launch() {
        let table = table(3);
        let mut supervisor = Supervisor::new(&table, FakeHost::new());
        supervisor.run().unwrap();

        for launched in &supervisor.host.launched {
            let mut expected = BTreeSet::new();
            expected.extend(launched.stdin_source);
            if let Some(channel) = launched.output {
                expected.insert(channel.read);
                expected.insert(channel.write);
            }
            assert_eq!(launched.open_at_launch, expected, "stage {}", launched.position);
        }
    }

    #[test]
    fn parent_holds_no_descriptors_after_launching() {
        let table = table(4);
        let mut supervisor = Supervisor::new(&table, FakeHost::new());
        supervisor.run().unwrap();

        let host = &supervisor.host;
        assert!(host.open.is_empty(), "leaked {:?}", host.open);
        assert_eq!(host.released.len(), 2 * 3);
    }

    #[test]
    fn completions_in_any_order_are_matched_to_their_stage() {
        let table = table(3);
        let mut host = FakeHost::new();
        host.exit_order = vec![2, 0, 1];
        let mut supervisor = Supervisor::new(&table, host);
        let outcome = supervisor.run().unwrap();

        assert_eq!(outcome.wait_calls, 4);
        assert!(outcome.all_succeeded());
        for (position, stage) in outcome.stages.iter().enumerate() {
            assert_eq!(stage.runtime.position, position);
            assert_eq!(stage.runtime.pid, FakeHost::pid_for(position));
            assert_eq!(stage.status, Some(ExitStatus::Exited { code: 0 }));
        }
    }

    #[test]
    fn unknown_pid_is_recorded_and_draining_continues() {
        let table = table(2);
        let mut host = FakeHost::new();
        host.extra_events = vec![CompletionEvent::new(
            77,
            ExitStatus::Signaled {
                signal: libc::SIGKILL,
                core_dumped: false,
            },
        )];
        let mut supervisor = Supervisor::new(&table, host);
        let outcome = supervisor.run().unwrap();

        assert_eq!(outcome.unknown.len(), 1);
        assert_eq!(outcome.unknown[0].pid, 77);
        assert!(outcome.all_succeeded());
        assert_eq!(outcome.wait_calls, 4);
    }

    #[test]
    fn wait_failure_is_fatal() {
        let table = table(2);
        let mut host = FakeHost::new();
        host.fail_wait = true;
        let mut supervisor = Supervisor::new(&table, host);

        let err = supervisor.run().unwrap_err();
        assert_eq!(err.code, ErrorCode::SupervisorWaitFailed);
        assert_eq!(supervisor.state(), SupervisorState::Draining);
    }

    #[test]
    fn second_run_is_refused_without_relaunching() {
        let table = table(3);
        let mut supervisor = Supervisor::new(&table, FakeHost::new());
        supervisor.run().unwrap();

        let err = supervisor.run().unwrap_err();
        assert_eq!(err.code, ErrorCode::SupervisorAlreadyRun);
        assert_eq!(supervisor.host.launched.len(), 3);
        assert_eq!(supervisor.host.allocations, 2);
        assert_eq!(supervisor.runtimes.len(), 3);
        assert_eq!(supervisor.state(), SupervisorState::Done);
    }

    #[test]
    fn run_after_a_failed_drain_is_refused() {
        let table = table(2);
        let mut host = FakeHost::new();
        host.fail_wait = true;
        let mut supervisor = Supervisor::new(&table, host);
        supervisor.run().unwrap_err();

        let err = supervisor.run().unwrap_err();
        assert_eq!(err.code, ErrorCode::SupervisorAlreadyRun);
        assert_eq!(supervisor.host.launched.len(), 2);
    }

    #[test]
    fn allocation_failure_aborts_and_releases_retained_input() {
        let table = table(4);
        let mut host = FakeHost::new();
        host.fail_allocation_at = Some(2);
        let mut supervisor = Supervisor::new(&table, host);

        let err = supervisor.run().unwrap_err();
        assert_eq!(err.code, ErrorCode::PipelineResourceExhausted);

        let host = &supervisor.host;
        assert_eq!(host.launched.len(), 2);
        assert!(host.open.is_empty(), "leaked {:?}", host.open);
        assert_eq!(host.wait_calls, 0);
    }

    #[test]
    fn fork_failure_aborts_and_releases_fresh_channel() {
        let table = table(3);
        let mut host = FakeHost::new();
        host.fail_launch_at = Some(1);
        let mut supervisor = Supervisor::new(&table, host);

        let err = supervisor.run().unwrap_err();
        assert_eq!(err.details["operation"], "fork");

        let host = &supervisor.host;
        assert_eq!(host.launched.len(), 1);
        assert!(host.open.is_empty(), "leaked {:?}", host.open);
    }

    #[test]
    fn pipefail_reports_rightmost_failure() {
        let prog = StageDescriptor::new("prog", Vec::<String>::new());
        let outcome = PipelineOutcome {
            stages: vec![
                StageOutcome {
                    runtime: StageRuntime::new(&prog, 0, 1, 0),
                    status: Some(ExitStatus::Exited { code: 3 }),
                },
                StageOutcome {
                    runtime: StageRuntime::new(&prog, 1, 2, 0),
                    status: Some(ExitStatus::Signaled {
                        signal: libc::SIGPIPE,
                        core_dumped: false,
                    }),
                },
                StageOutcome {
                    runtime: StageRuntime::new(&prog, 2, 3, 0),
                    status: Some(ExitStatus::Exited { code: 0 }),
                },
            ],
            unknown: Vec::new(),
            channels: Vec::new(),
            wait_calls: 4,
        };

        assert!(!outcome.all_succeeded());
        assert_eq!(outcome.pipefail_code(), 128 + libc::SIGPIPE);
    }
}
