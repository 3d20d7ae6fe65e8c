/// Macro for pipeline lifecycle diagnostics.
///
/// Every event carries the pid of the process emitting it and the source
/// location, so lines from the supervisor and from forked stages can be told
/// apart when they interleave on stderr.
///
/// Usage:
/// ```ignore
/// log_event!("PIPE ==> {{{}, {}}}", channel.read, channel.write);
/// log_event!("CLOSE({} ==> {})", label, fd);
/// ```
#[macro_export]
macro_rules! log_event {
    ($($arg:tt)*) => {
        ::tracing::info!(
            pid = $crate::sys::getpid(),
            location = concat!(file!(), ":", line!()),
            "{}",
            format_args!($($arg)*)
        )
    };
}

/// Same as `log_event!`, at warn level. Used for non-fatal anomalies.
#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        ::tracing::warn!(
            pid = $crate::sys::getpid(),
            location = concat!(file!(), ":", line!()),
            "{}",
            format_args!($($arg)*)
        )
    };
}

/// Same as `log_event!`, at error level. Used right before a fatal exit.
#[macro_export]
macro_rules! log_failure {
    ($($arg:tt)*) => {
        ::tracing::error!(
            pid = $crate::sys::getpid(),
            location = concat!(file!(), ":", line!()),
            "{}",
            format_args!($($arg)*)
        )
    };
}

pub mod core;

// Users can write `pipevisor::supervisor` instead of `pipevisor::core::supervisor`
pub use self::core::*;
