//! Script lifecycle state machine.
//!
//! The [`ScriptRunner`] drives a [`ScriptDefinition`] through
//!
//! ```text
//! Initializing → OnStart → step 1 … step N → OnSuccess | OnError | OnCancel → OnFinish
//! ```
//!
//! and reports the result as a [`RunReport`]. Every transition is published to
//! subscribers as a [`RunEvent`].
//!
//! Routing rules:
//!
//! - A scripted failure escaping `on_start` or a step goes to `on_failure`, then `on_finish`.
//! - Any other error skips `on_failure` and goes straight to `on_finish`. The error is
//!   reported unchanged.
//! - `exit_success` ends the run through `on_success`. `exit_failure` is an ordinary
//!   scripted failure.
//! - Cancellation goes to `on_cancel`, then `on_finish`, and wins over any result that
//!   is ready at the same time.
//!
//! Once a terminal hook starts, cancellation is no longer observed, and errors
//! raised by terminal hooks are logged without changing the outcome.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use droidpilot_core::driver::DeviceDriver;
//! use droidpilot_core::runner::ScriptRunner;
//! use droidpilot_core::script::ScriptDefinition;
//!
//! async fn run(driver: Arc<dyn DeviceDriver>, script: Arc<ScriptDefinition>) {
//!     let runner = ScriptRunner::new(driver);
//!     let handle = runner.spawn(script);
//!     let report = handle.join().await.unwrap();
//!     println!("{:?} in {:?}", report.status(), report.duration);
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DroidpilotConfig;
use crate::context::DeviceContext;
use crate::driver::DeviceDriver;
use crate::error::{Error, ExitSignal, Result};
use crate::provider::ValueProvider;
use crate::script::{CurrentStep, ScriptDefinition};

const EVENT_CAPACITY: usize = 256;

/// How a run ended, without the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Failure,
    Cancelled,
}

/// Events published while a script runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    Transition { run_id: Uuid, step: CurrentStep },
    Finished { run_id: Uuid, status: RunStatus },
}

/// How a run ended.
///
/// `origin` is the position that triggered the end; it is `None` only when a
/// successful run had no steps.
#[derive(Debug)]
pub enum RunOutcome {
    Success { origin: Option<CurrentStep> },
    Failure { origin: CurrentStep, error: Error },
    Cancelled { origin: CurrentStep },
}

/// Summary of one run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        match self.outcome {
            RunOutcome::Success { .. } => RunStatus::Success,
            RunOutcome::Failure { .. } => RunStatus::Failure,
            RunOutcome::Cancelled { .. } => RunStatus::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Success
    }

    /// The error that failed the run, if it failed.
    pub fn error(&self) -> Option<&Error> {
        match &self.outcome {
            RunOutcome::Failure { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Handle for controlling a spawned run.
pub struct RunHandle {
    run_id: Uuid,
    cancel_token: CancellationToken,
    join_handle: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Requests cancellation without waiting.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Returns whether the run is still in progress.
    pub fn is_running(&self) -> bool {
        !self.join_handle.is_finished()
    }

    /// Waits for the run to end.
    pub async fn join(self) -> std::result::Result<RunReport, JoinError> {
        self.join_handle.await
    }

    /// Cancels the run and waits for its terminal hooks to complete.
    pub async fn stop(self) -> std::result::Result<RunReport, JoinError> {
        self.cancel_token.cancel();
        self.join_handle.await
    }
}

/// Runs scripts against one device.
///
/// Each run gets its own [`DeviceContext`], so variables and device info never
/// leak between runs. Runs spawned from the same runner execute independently.
#[derive(Clone)]
pub struct ScriptRunner {
    driver: Arc<dyn DeviceDriver>,
    config: DroidpilotConfig,
    provider: Option<Arc<dyn ValueProvider>>,
    event_tx: broadcast::Sender<RunEvent>,
}

impl ScriptRunner {
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            driver,
            config: DroidpilotConfig::default(),
            provider: None,
            event_tx,
        }
    }

    pub fn with_config(mut self, config: DroidpilotConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ValueProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Subscribe to lifecycle events of every run started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.event_tx.subscribe()
    }

    /// Runs `script` to completion on the current task.
    pub async fn run(&self, script: &ScriptDefinition) -> RunReport {
        self.run_with_cancel(script, CancellationToken::new()).await
    }

    /// Runs `script`, observing `cancel` until a terminal hook starts.
    pub async fn run_with_cancel(&self, script: &ScriptDefinition, cancel: CancellationToken) -> RunReport {
        self.execute(Uuid::new_v4(), script, cancel).await
    }

    /// Runs `script` on its own task.
    pub fn spawn(&self, script: Arc<ScriptDefinition>) -> RunHandle {
        let run_id = Uuid::new_v4();
        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let runner = self.clone();

        let join_handle =
            tokio::spawn(async move { runner.execute(run_id, &script, token_clone).await });

        RunHandle {
            run_id,
            cancel_token,
            join_handle,
        }
    }

    async fn execute(&self, run_id: Uuid, script: &ScriptDefinition, cancel: CancellationToken) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut ctx = DeviceContext::new(Arc::clone(&self.driver), cancel.clone())
            .with_config(self.config.clone());
        if let Some(provider) = &self.provider {
            ctx = ctx.with_provider(Arc::clone(provider));
        }

        let span = info_span!("script_run", %run_id, script = script.name());
        let outcome = Execution {
            run_id,
            script,
            ctx,
            cancel,
            events: &self.event_tx,
        }
        .run()
        .instrument(span)
        .await;

        let report = RunReport {
            run_id,
            started_at,
            duration: start.elapsed(),
            outcome,
        };
        let _ = self.event_tx.send(RunEvent::Finished {
            run_id,
            status: report.status(),
        });
        report
    }
}

/// Races `fut` against cancellation. Cancellation wins a tie.
async fn race<F>(cancel: &CancellationToken, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

/// On-finish origin for a terminal transition.
fn finish_origin(origin: &CurrentStep) -> Option<CurrentStep> {
    match origin {
        CurrentStep::Initializing => None,
        other => Some(other.clone()),
    }
}

/// State of one run in progress.
struct Execution<'r> {
    run_id: Uuid,
    script: &'r ScriptDefinition,
    ctx: DeviceContext,
    cancel: CancellationToken,
    events: &'r broadcast::Sender<RunEvent>,
}

impl Execution<'_> {
    fn transition(&self, step: CurrentStep) {
        info!(step = %step, "transition");
        let _ = self.events.send(RunEvent::Transition { run_id: self.run_id, step });
    }

    async fn run(mut self) -> RunOutcome {
        self.transition(CurrentStep::Initializing);
        let res = self.ctx.refresh_device_info().await;
        if let Some(outcome) = self.conclude(CurrentStep::Initializing, res).await {
            return outcome;
        }

        self.transition(CurrentStep::OnStart);
        if let Some(hook) = self.script.hooks.on_start.clone() {
            let res = race(&self.cancel, hook(&mut self.ctx)).await;
            if let Some(outcome) = self.conclude(CurrentStep::OnStart, res).await {
                return outcome;
            }
        }

        let script = self.script;
        let total = script.steps().len();
        let mut last = None;
        for (i, step) in script.steps().iter().enumerate() {
            let position = CurrentStep::step(step.title(), i + 1, total);
            self.transition(position.clone());

            let span = info_span!("step", title = step.title(), index = i + 1, total);
            let res = race(&self.cancel, (step.action())(&mut self.ctx))
                .instrument(span)
                .await;
            if let Some(outcome) = self.conclude(position.clone(), res).await {
                return outcome;
            }
            last = Some(position);
        }

        self.succeed(last).await
    }

    /// Decides whether the run ends after a phase. `None` means carry on.
    async fn conclude(&mut self, origin: CurrentStep, res: Result<()>) -> Option<RunOutcome> {
        if self.cancel.is_cancelled() {
            return Some(self.cancelled(origin).await);
        }
        let outcome = match res {
            Ok(()) => return None,
            Err(Error::Exit(ExitSignal::Success)) => self.succeed(Some(origin)).await,
            Err(Error::Cancelled) => self.cancelled(origin).await,
            Err(e) if e.is_scripted() => self.fail(origin, e).await,
            Err(e) => self.abort(origin, e).await,
        };
        Some(outcome)
    }

    async fn succeed(&mut self, origin: Option<CurrentStep>) -> RunOutcome {
        self.ctx.disarm_cancellation();
        self.transition(CurrentStep::OnSuccess(origin.clone().map(Box::new)));
        if let Some(hook) = self.script.hooks.on_success.clone() {
            log_hook_error("on_success", hook(&mut self.ctx, origin.clone()).await);
        }
        self.finish(origin.clone()).await;
        RunOutcome::Success { origin }
    }

    async fn fail(&mut self, origin: CurrentStep, error: Error) -> RunOutcome {
        self.ctx.disarm_cancellation();
        warn!(origin = %origin, error = %error, "script failed");
        self.transition(CurrentStep::OnError(Box::new(origin.clone())));
        if let Some(hook) = self.script.hooks.on_failure.clone() {
            log_hook_error("on_failure", hook(&mut self.ctx, &error, origin.clone()).await);
        }
        self.finish(finish_origin(&origin)).await;
        RunOutcome::Failure { origin, error }
    }

    async fn cancelled(&mut self, origin: CurrentStep) -> RunOutcome {
        self.ctx.disarm_cancellation();
        info!(origin = %origin, "script cancelled");
        self.transition(CurrentStep::OnCancel(Box::new(origin.clone())));
        if let Some(hook) = self.script.hooks.on_cancel.clone() {
            log_hook_error("on_cancel", hook(&mut self.ctx, origin.clone()).await);
        }
        self.finish(finish_origin(&origin)).await;
        RunOutcome::Cancelled { origin }
    }

    /// Unexpected error: no `on_failure`, straight to `on_finish`.
    async fn abort(&mut self, origin: CurrentStep, error: Error) -> RunOutcome {
        self.ctx.disarm_cancellation();
        error!(origin = %origin, error = %error, "script aborted by unexpected error");
        self.finish(finish_origin(&origin)).await;
        RunOutcome::Failure { origin, error }
    }

    async fn finish(&mut self, origin: Option<CurrentStep>) {
        self.transition(CurrentStep::OnFinish(origin.clone().map(Box::new)));
        if let Some(hook) = self.script.hooks.on_finish.clone() {
            log_hook_error("on_finish", hook(&mut self.ctx, origin).await);
        }
    }
}

fn log_hook_error(hook: &str, res: Result<()>) {
    if let Err(e) = res {
        warn!(hook, error = %e, "terminal hook failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptError;

    #[test]
    fn test_finish_origin_drops_initializing() {
        assert_eq!(finish_origin(&CurrentStep::Initializing), None);
        assert_eq!(finish_origin(&CurrentStep::OnStart), Some(CurrentStep::OnStart));
    }

    #[test]
    fn test_report_status() {
        let report = RunReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            outcome: RunOutcome::Failure {
                origin: CurrentStep::step("B", 2, 2),
                error: ScriptError::PredicateNotFound.into(),
            },
        };
        assert_eq!(report.status(), RunStatus::Failure);
        assert!(!report.is_success());
        assert!(report.error().is_some_and(Error::is_scripted));
    }

    #[test]
    fn test_event_serialization() {
        let run_id = Uuid::nil();
        let event = RunEvent::Finished { run_id, status: RunStatus::Cancelled };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Finished");
        assert_eq!(json["status"], "Cancelled");
    }
}
