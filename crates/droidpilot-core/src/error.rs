//! Error taxonomy for script execution.
//!
//! Errors are split into two strictly separated classes:
//!
//! - **Scripted failures** ([`ScriptError`]): expected, recoverable conditions such
//!   as a predicate that matched nothing. These are the only errors that the
//!   control-flow combinators ([`no_error`](crate::context::DeviceContext::no_error),
//!   [`first_success_of`](crate::context::DeviceContext::first_success_of)) intercept.
//! - **Unexpected errors**: driver and transport faults ([`DriverError`]), variable
//!   misuse ([`VariableError`]), provider failures. They pass through every combinator
//!   and end the run.
//!
//! Cancellation ([`Error::Cancelled`]) and explicit exits ([`Error::Exit`]) travel on the
//! error channel so they can unwind nested calls, but neither is a failure in itself.

use std::fmt;

use thiserror::Error;

use crate::variables::ValueKind;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Expected, script-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// No element on screen satisfied the predicate.
    #[error("No element matches the predicate")]
    PredicateNotFound,

    /// A check/uncheck was requested on an element that is not checkable.
    #[error("Element is not checkable: {0}")]
    ItemNotCheckable(String),

    /// A scroll was requested on an element that is not scrollable, or no
    /// scrollable element exists.
    #[error("Element is not scrollable: {0}")]
    ItemNotScrollable(String),

    /// The scrollable region stopped moving before the predicate matched.
    #[error("Reached the end of the scroll without finding the predicate")]
    EndOfScroll,

    /// `wait_for` expired before the predicate matched.
    #[error("Timed out after {timeout_ms}ms waiting for the predicate")]
    WaitForPredicateTimeout { timeout_ms: u64 },

    /// Every attempt given to `first_success_of` raised a scripted failure.
    #[error("None of the {attempts} callbacks succeeded")]
    NoneCallbackWorked { attempts: usize },

    /// The script called `exit_failure`.
    #[error("Script exited with failure: {0}")]
    ExitFailure(String),

    /// `force_stop` targeted a package that is not installed.
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// `wait_for_wifi` expired before the device joined the network.
    #[error("Timed out after {timeout_ms}ms waiting for wifi '{ssid}'")]
    WaitForWifiTimeout { ssid: String, timeout_ms: u64 },

    /// `wait_package` expired before the package was installed.
    #[error("Timed out after {timeout_ms}ms waiting for package '{package}'")]
    WaitForPackageTimeout { package: String, timeout_ms: u64 },
}

/// Errors raised by a [`DeviceDriver`](crate::driver::DeviceDriver) backend.
#[derive(Error, Debug)]
pub enum DriverError {
    /// A command ran but reported failure.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The backend is not available or not connected.
    #[error("Not connected to the device")]
    NotConnected,

    /// The connection to the device was lost mid-operation.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The transport timed out.
    #[error("Operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device output could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Errors raised by the run-scoped [`VariableStore`](crate::variables::VariableStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariableError {
    #[error("Variable '{0}' is not defined")]
    NotFound(String),

    #[error("Variable '{name}' holds a {found}, not a {expected}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

/// Explicit end-of-run request raised from inside a step.
///
/// Only success is a signal. `exit_failure` raises [`ScriptError::ExitFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitSignal {
    Success,
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitSignal::Success => write!(f, "exit success"),
        }
    }
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Script requested {0}")]
    Exit(ExitSignal),

    #[error("Run was cancelled")]
    Cancelled,
}

impl Error {
    /// Returns true for members of the scripted-failure family.
    pub fn is_scripted(&self) -> bool {
        matches!(self, Error::Script(_))
    }

    /// Returns the scripted failure, if this is one.
    pub fn as_script(&self) -> Option<&ScriptError> {
        match self {
            Error::Script(e) => Some(e),
            _ => None,
        }
    }
}
