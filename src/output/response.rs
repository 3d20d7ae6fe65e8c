//! CLI response formatting and output.
//!
//! Provides the JSON envelope, printing, and exit code mapping. Stdout
//! belongs to the pipeline once stages run, so run reports and errors go to
//! stderr; only `--plan` prints to stdout.

use pipevisor::error::Hint;
use pipevisor::{Error, ErrorCode, Result};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize response".to_string()))
        })
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: if err.hints.is_empty() {
                    None
                } else {
                    Some(err.hints.clone())
                },
            }),
        }
    }
}

fn write_response<T: Serialize>(mut handle: impl Write, response: &CliResponse<T>) -> Result<()> {
    let payload = response.to_json()?;
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(()); // Exit gracefully on SIGPIPE
        }
        return Err(Error::internal_io(
            e.to_string(),
            Some("write response".to_string()),
        ));
    }
    Ok(())
}

pub fn print_success<T: Serialize>(data: T) -> Result<()> {
    write_response(io::stdout().lock(), &CliResponse::success(data))
}

pub fn print_success_to_stderr<T: Serialize>(data: T) -> Result<()> {
    write_response(io::stderr().lock(), &CliResponse::success(data))
}

pub fn print_error(err: &Error) {
    // Nothing sensible is left to do if stderr itself is gone.
    let _ = write_response(io::stderr().lock(), &CliResponse::<()>::from_error(err));
}

pub fn exit_code_for_error(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::ConfigNotFound
        | ErrorCode::ConfigInvalidJson
        | ErrorCode::ConfigInvalidToml
        | ErrorCode::ConfigInvalidValue => 2,

        ErrorCode::PipelineResourceExhausted => 10,

        ErrorCode::SupervisorWaitFailed => 20,

        // Stage-side failures never reach the supervisor's exit path; map
        // them like internal errors should one escape.
        ErrorCode::StageLaunchFailed
        | ErrorCode::StageRedirectFailed
        | ErrorCode::SupervisorUnknownProcess
        | ErrorCode::SupervisorAlreadyRun
        | ErrorCode::InternalIoError
        | ErrorCode::InternalJsonError
        | ErrorCode::InternalUnexpected => 1,
    }
}
