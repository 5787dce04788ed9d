//! Control-flow combinators available to steps.
//!
//! These only ever inspect the scripted-failure family ([`Error::is_scripted`]),
//! which includes `exit_failure`. Driver faults, variable errors, cancellation,
//! and `exit_success` pass through untouched.

use tracing::{debug, warn};

use crate::context::DeviceContext;
use crate::element::UiElement;
use crate::error::{Error, ExitSignal, Result, ScriptError};
use crate::script::{ActionFn, ActionFuture};

impl DeviceContext {
    /// Runs each attempt in order until one succeeds.
    ///
    /// A scripted failure moves on to the next attempt. Any other error stops
    /// immediately. If every attempt fails, the result is `NoneCallbackWorked`.
    pub async fn first_success_of<I>(&mut self, attempts: I) -> Result<()>
    where
        I: IntoIterator<Item = ActionFn>,
        I::IntoIter: Send,
    {
        let mut tried = 0;
        for attempt in attempts {
            tried += 1;
            match attempt(&mut *self).await {
                Ok(()) => {
                    debug!(attempt = tried, "first_success_of: attempt succeeded");
                    return Ok(());
                }
                Err(e) if e.is_scripted() => {
                    debug!(attempt = tried, error = %e, "first_success_of: attempt failed");
                }
                Err(e) => return Err(e),
            }
        }
        Err(ScriptError::NoneCallbackWorked { attempts: tried }.into())
    }

    /// Runs `action`, swallowing a scripted failure.
    pub async fn no_error<F>(&mut self, action: F) -> Result<()>
    where
        F: for<'a> FnOnce(&'a mut DeviceContext) -> ActionFuture<'a> + Send,
    {
        match action(&mut *self).await {
            Err(e) if e.is_scripted() => {
                warn!(error = %e, "ignored scripted failure");
                Ok(())
            }
            other => other,
        }
    }

    /// Repeats `action` on the first element matching `predicate` until nothing
    /// matches. The screen is captured afresh before every iteration.
    ///
    /// Returns the number of iterations performed.
    pub async fn repeat_while<P, F>(&mut self, predicate: P, mut action: F) -> Result<usize>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
        F: for<'a> FnMut(&'a mut DeviceContext, UiElement) -> ActionFuture<'a> + Send,
    {
        let mut iterations = 0;
        while let Some(element) = self.find_first_or_none(&predicate).await? {
            action(&mut *self, element).await?;
            iterations += 1;
        }
        debug!(iterations, "repeat_while done");
        Ok(iterations)
    }

    /// Ends the run successfully from inside a step.
    ///
    /// The signal travels on the error channel, so `?` unwinds it through
    /// enclosing combinators untouched.
    pub fn exit_success(&self) -> Result<()> {
        Err(Error::Exit(ExitSignal::Success))
    }

    /// Fails the current step with `ExitFailure`. An empty reason is allowed.
    ///
    /// Like any scripted failure, it is caught by `no_error` and
    /// `first_success_of`; otherwise the run goes to `on_failure`.
    pub fn exit_failure(&self, reason: impl Into<String>) -> Result<()> {
        Err(ScriptError::ExitFailure(reason.into()).into())
    }
}
