use crate::config::InputMode;
use crate::coordinator::ScanMode;

/// System shutdown reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}

/// How an interactive scanning session begins
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Mode to start in; `None` waits for the operator
    pub mode: Option<ScanMode>,
    /// Override the configured input
    pub input: Option<InputMode>,
    /// Read the terminal for commands and print feedback
    pub interactive: bool,
}
