//! What a failure means for the pipeline.
//!
//! Fallible operations return `Error`; this module decides whether that error
//! aborts the whole pipeline, only the stage process it happened in, or is
//! logged and ignored.

use nix::errno::Errno;

use crate::error::{Error, ErrorCode, Result};
use crate::log_warning;

/// Exit status of a stage whose program could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit status of a stage whose program exists but could not be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit status of a stage that failed before reaching exec.
pub const EXIT_STAGE_SETUP: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop supervising and exit non-zero. Launched stages are left to the OS.
    AbortPipeline,
    /// Terminate the current stage process only.
    AbortStage,
    /// Log and keep going.
    Continue,
}

pub fn disposition(code: ErrorCode) -> Disposition {
    match code {
        ErrorCode::StageLaunchFailed | ErrorCode::StageRedirectFailed => Disposition::AbortStage,
        ErrorCode::SupervisorUnknownProcess => Disposition::Continue,
        ErrorCode::ConfigNotFound
        | ErrorCode::ConfigInvalidJson
        | ErrorCode::ConfigInvalidToml
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::PipelineResourceExhausted
        | ErrorCode::SupervisorWaitFailed
        | ErrorCode::SupervisorAlreadyRun
        | ErrorCode::InternalIoError
        | ErrorCode::InternalJsonError
        | ErrorCode::InternalUnexpected => Disposition::AbortPipeline,
    }
}

/// Exit status of a forked stage that failed with `code` before exec
/// replaced it. Shell conventions: 127 not found, 126 not executable.
///
/// Runs in the child after fork, so it only inspects its arguments.
pub fn stage_exit_code(code: ErrorCode, errno: Errno) -> i32 {
    match (code, errno) {
        (ErrorCode::StageLaunchFailed, Errno::ENOENT) => EXIT_NOT_FOUND,
        (ErrorCode::StageLaunchFailed, _) => EXIT_NOT_EXECUTABLE,
        _ => EXIT_STAGE_SETUP,
    }
}

/// Log errors whose disposition is `Continue`; hand everything else back.
pub fn handle(err: Error) -> Result<()> {
    match disposition(err.code) {
        Disposition::Continue => {
            log_warning!("{} [{}]", err, err.code.as_str());
            Ok(())
        }
        Disposition::AbortPipeline | Disposition::AbortStage => Err(err),
    }
}
