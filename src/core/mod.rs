// Public API - consumed by the binary and by integration tests
pub mod channel;
pub mod defaults;
pub mod error;
pub mod launcher;
pub mod policy;
pub mod report;
pub mod signals;
pub mod stage;
pub mod status;
pub mod supervisor;
pub mod sys;

pub(crate) mod paths;

pub use error::{Error, ErrorCode, Result};
pub use stage::{StageDescriptor, StageRuntime, StageTable};
pub use status::{CompletionEvent, ExitStatus};
pub use supervisor::{OsHost, PipelineOutcome, StageHost, Supervisor, SupervisorState};
