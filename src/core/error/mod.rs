use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::ExitStatus;
use crate::supervisor::SupervisorState;

#[cfg(test)]
pub(crate) mod codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigNotFound,
    ConfigInvalidJson,
    ConfigInvalidToml,
    ConfigInvalidValue,

    PipelineResourceExhausted,

    StageLaunchFailed,
    StageRedirectFailed,

    SupervisorWaitFailed,
    SupervisorUnknownProcess,
    SupervisorAlreadyRun,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigNotFound => "config.not_found",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidToml => "config.invalid_toml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::PipelineResourceExhausted => "pipeline.resource_exhausted",

            ErrorCode::StageLaunchFailed => "stage.launch_failed",
            ErrorCode::StageRedirectFailed => "stage.redirect_failed",

            ErrorCode::SupervisorWaitFailed => "supervisor.wait_failed",
            ErrorCode::SupervisorUnknownProcess => "supervisor.unknown_process",
            ErrorCode::SupervisorAlreadyRun => "supervisor.already_run",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigNotFoundDetails {
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigParseDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

/// OS-level failure of a named primitive (`pipe`, `fork`, `wait`).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsErrorDetails {
    pub operation: String,
    pub error: String,
    pub errno: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownProcessDetails {
    pub pid: i32,
    pub status: ExitStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    /// `pipe` or `fork` was refused by the OS. Fatal to the whole pipeline.
    pub fn resource_exhausted(operation: impl Into<String>, errno: Errno) -> Self {
        let operation = operation.into();
        let details = to_details(OsErrorDetails {
            operation: operation.clone(),
            error: errno.desc().to_string(),
            errno: errno as i32,
        });

        Self::new(
            ErrorCode::PipelineResourceExhausted,
            format!("{} refused by the operating system: {}", operation, errno),
            details,
        )
        .with_hint("Check the open file and process limits (ulimit -n, ulimit -u)")
    }

    pub fn wait_failed(errno: Errno) -> Self {
        let details = to_details(OsErrorDetails {
            operation: "wait".to_string(),
            error: errno.desc().to_string(),
            errno: errno as i32,
        });

        Self::new(
            ErrorCode::SupervisorWaitFailed,
            format!("wait failed: {}", errno),
            details,
        )
    }

    pub fn unknown_process(pid: i32, status: ExitStatus) -> Self {
        Self::new(
            ErrorCode::SupervisorUnknownProcess,
            format!("Process PID={} not found", pid),
            to_details(UnknownProcessDetails { pid, status }),
        )
    }

    /// `run` was called on a supervisor that already left `Idle`.
    pub fn already_run(state: SupervisorState) -> Self {
        Self::new(
            ErrorCode::SupervisorAlreadyRun,
            "Pipeline supervisor has already run",
            serde_json::json!({ "state": state }),
        )
        .with_hint("Build a new Supervisor for every pipeline run")
    }

    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigNotFound,
            "Pipeline configuration file not found",
            to_details(ConfigNotFoundDetails { path: path.into() }),
        )
        .with_hint("Pass an existing file with --config, or omit it to use the built-in table")
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = to_details(ConfigParseDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in pipeline configuration",
            details,
        )
    }

    pub fn config_invalid_toml(path: impl Into<String>, err: toml::de::Error) -> Self {
        let details = to_details(ConfigParseDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidToml,
            "Invalid TOML in pipeline configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.clone(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid pipeline configuration: {}", problem),
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// OS errno carried in `details`, if the error came from a failed primitive.
    pub fn errno(&self) -> Option<i32> {
        self.details
            .get("errno")
            .and_then(Value::as_i64)
            .map(|errno| errno as i32)
    }
}
