//! Terminal detection for CLI output decisions.

use std::io::{self, IsTerminal};

/// Colour log lines only when a person is reading stderr.
pub fn is_stderr_tty() -> bool {
    io::stderr().is_terminal()
}
