//! Script definitions: steps, lifecycle hooks, and execution positions.
//!
//! A script is assembled with a [`ScriptBuilder`] and frozen into an immutable
//! [`ScriptDefinition`] before it is handed to the
//! [`ScriptRunner`](crate::runner::ScriptRunner).
//!
//! Step bodies and hooks are async closures that receive the run's
//! [`DeviceContext`]. Because the future borrows the context, closures return a
//! boxed future:
//!
//! ```no_run
//! use droidpilot_core::query::by;
//! use droidpilot_core::script::ScriptBuilder;
//!
//! let script = ScriptBuilder::new("enable wifi")
//!     .step("open settings", |ctx| Box::pin(async move {
//!         ctx.launch_component("com.android.settings", ".Settings", true, Default::default()).await
//!     }))
//!     .step("tap wifi", |ctx| Box::pin(async move {
//!         ctx.click_first(by::text("Wi-Fi")).await.map(drop)
//!     }))
//!     .build();
//! assert_eq!(script.steps().len(), 2);
//! ```

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::DeviceContext;
use crate::error::{Error, Result};

/// Boxed future returned by step bodies and hooks.
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A step body or `on_start` hook.
pub type ActionFn = Arc<dyn for<'a> Fn(&'a mut DeviceContext) -> ActionFuture<'a> + Send + Sync>;

/// `on_success` / `on_finish` hook. The origin is `None` when the run ended outside any step.
pub type OutcomeHookFn = Arc<
    dyn for<'a> Fn(&'a mut DeviceContext, Option<CurrentStep>) -> ActionFuture<'a> + Send + Sync,
>;

/// `on_cancel` hook, given the position where cancellation was observed.
pub type CancelHookFn =
    Arc<dyn for<'a> Fn(&'a mut DeviceContext, CurrentStep) -> ActionFuture<'a> + Send + Sync>;

/// `on_failure` hook, given the scripted failure and the step it escaped from.
pub type FailureHookFn = Arc<
    dyn for<'a> Fn(&'a mut DeviceContext, &'a Error, CurrentStep) -> ActionFuture<'a>
        + Send
        + Sync,
>;

/// Wraps a closure as an [`ActionFn`].
///
/// Used to build the attempt list of
/// [`first_success_of`](DeviceContext::first_success_of).
pub fn action<F>(f: F) -> ActionFn
where
    F: for<'a> Fn(&'a mut DeviceContext) -> ActionFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A titled unit of work.
#[derive(Clone)]
pub struct Step {
    title: String,
    action: ActionFn,
}

impl Step {
    pub fn new(title: impl Into<String>, action: ActionFn) -> Self {
        Self { title: title.into(), action }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub(crate) fn action(&self) -> &ActionFn {
        &self.action
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("title", &self.title).finish_non_exhaustive()
    }
}

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_start: Option<ActionFn>,
    pub(crate) on_success: Option<OutcomeHookFn>,
    pub(crate) on_failure: Option<FailureHookFn>,
    pub(crate) on_cancel: Option<CancelHookFn>,
    pub(crate) on_finish: Option<OutcomeHookFn>,
}

/// An immutable, ready-to-run script.
#[derive(Clone)]
pub struct ScriptDefinition {
    name: String,
    provider: Option<String>,
    steps: Vec<Step>,
    pub(crate) hooks: Hooks,
}

impl ScriptDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the value provider this script expects, if any.
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl fmt::Debug for ScriptDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptDefinition")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

/// Collects steps and hooks, then freezes them with [`build`](Self::build).
///
/// Setting a hook twice keeps the last one.
pub struct ScriptBuilder {
    name: String,
    provider: Option<String>,
    steps: Vec<Step>,
    hooks: Hooks,
}

impl ScriptBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: None,
            steps: Vec::new(),
            hooks: Hooks::default(),
        }
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider = Some(name.into());
        self
    }

    pub fn step<F>(mut self, title: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut DeviceContext) -> ActionFuture<'a> + Send + Sync + 'static,
    {
        self.steps.push(Step::new(title, Arc::new(f)));
        self
    }

    /// Appends an already built step.
    pub fn push_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut DeviceContext) -> ActionFuture<'a> + Send + Sync + 'static,
    {
        self.hooks.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut DeviceContext, Option<CurrentStep>) -> ActionFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut DeviceContext, &'a Error, CurrentStep) -> ActionFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.on_failure = Some(Arc::new(f));
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut DeviceContext, CurrentStep) -> ActionFuture<'a> + Send + Sync + 'static,
    {
        self.hooks.on_cancel = Some(Arc::new(f));
        self
    }

    pub fn on_finish<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut DeviceContext, Option<CurrentStep>) -> ActionFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.on_finish = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> ScriptDefinition {
        ScriptDefinition {
            name: self.name,
            provider: self.provider,
            steps: self.steps,
            hooks: self.hooks,
        }
    }
}

/// Where the runner currently is in a script's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentStep {
    Initializing,
    OnStart,
    ScriptStep {
        title: String,
        /// 1-based.
        current: usize,
        total: usize,
    },
    OnError(Box<CurrentStep>),
    OnCancel(Box<CurrentStep>),
    OnFinish(Option<Box<CurrentStep>>),
    OnSuccess(Option<Box<CurrentStep>>),
}

impl CurrentStep {
    pub fn step(title: impl Into<String>, current: usize, total: usize) -> Self {
        CurrentStep::ScriptStep { title: title.into(), current, total }
    }

    /// The step that triggered this terminal transition, if any.
    pub fn origin(&self) -> Option<&CurrentStep> {
        match self {
            CurrentStep::OnError(origin) | CurrentStep::OnCancel(origin) => Some(&**origin),
            CurrentStep::OnFinish(origin) | CurrentStep::OnSuccess(origin) => origin.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for CurrentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentStep::Initializing => write!(f, "initializing"),
            CurrentStep::OnStart => write!(f, "on start"),
            CurrentStep::ScriptStep { title, current, total } => {
                write!(f, "step {}/{} '{}'", current, total, title)
            }
            CurrentStep::OnError(origin) => write!(f, "on error (from {})", origin),
            CurrentStep::OnCancel(origin) => write!(f, "on cancel (from {})", origin),
            CurrentStep::OnFinish(Some(origin)) => write!(f, "on finish (from {})", origin),
            CurrentStep::OnFinish(None) => write!(f, "on finish"),
            CurrentStep::OnSuccess(Some(origin)) => write!(f, "on success (from {})", origin),
            CurrentStep::OnSuccess(None) => write!(f, "on success"),
        }
    }
}

/// What a script loader produced.
#[derive(Debug, Clone)]
pub enum ScriptInfo {
    Valid {
        path: Option<PathBuf>,
        script: Arc<ScriptDefinition>,
        /// Raw script text.
        source: String,
    },
    Invalid {
        path: Option<PathBuf>,
        message: String,
        /// Steps parsed before the error, if the loader got that far.
        steps: Vec<Step>,
    },
}

impl ScriptInfo {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ScriptInfo::Valid { path, .. } | ScriptInfo::Invalid { path, .. } => path.as_ref(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ScriptInfo::Valid { .. })
    }

    pub fn steps(&self) -> &[Step] {
        match self {
            ScriptInfo::Valid { script, .. } => script.steps(),
            ScriptInfo::Invalid { steps, .. } => steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut DeviceContext) -> ActionFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    #[test]
    fn test_builder_preserves_step_order() {
        let script = ScriptBuilder::new("demo")
            .step("first", noop)
            .step("second", noop)
            .push_step(Step::new("third", action(noop)))
            .build();

        let titles: Vec<&str> = script.steps().iter().map(Step::title).collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
        assert_eq!(script.name(), "demo");
        assert!(script.provider().is_none());
    }

    #[test]
    fn test_builder_records_hooks() {
        let script = ScriptBuilder::new("hooks")
            .provider("vault")
            .on_start(noop)
            .on_finish(|_, _| Box::pin(async { Ok(()) }))
            .build();
        assert!(script.hooks.on_start.is_some());
        assert!(script.hooks.on_finish.is_some());
        assert!(script.hooks.on_failure.is_none());
        assert_eq!(script.provider(), Some("vault"));
    }

    #[test]
    fn test_current_step_origin() {
        let step = CurrentStep::step("B", 2, 2);
        assert_eq!(CurrentStep::OnError(Box::new(step.clone())).origin(), Some(&step));
        assert_eq!(CurrentStep::OnFinish(None).origin(), None);
        assert_eq!(step.origin(), None);
    }

    #[test]
    fn test_current_step_display() {
        let step = CurrentStep::step("Open settings", 1, 3);
        assert_eq!(step.to_string(), "step 1/3 'Open settings'");
        assert_eq!(
            CurrentStep::OnCancel(Box::new(step)).to_string(),
            "on cancel (from step 1/3 'Open settings')"
        );
    }

    #[test]
    fn test_current_step_serialization() {
        let json = serde_json::to_value(CurrentStep::OnSuccess(None)).unwrap();
        assert_eq!(json, serde_json::json!({ "OnSuccess": null }));
        let json = serde_json::to_value(CurrentStep::OnStart).unwrap();
        assert_eq!(json, serde_json::json!("OnStart"));
    }

    #[test]
    fn test_script_info_steps() {
        let invalid = ScriptInfo::Invalid {
            path: Some(PathBuf::from("wifi.script")),
            message: "unexpected token".into(),
            steps: vec![Step::new("partial", action(noop))],
        };
        assert!(!invalid.is_valid());
        assert_eq!(invalid.steps().len(), 1);
        assert_eq!(invalid.path(), Some(&PathBuf::from("wifi.script")));

        let valid = ScriptInfo::Valid {
            path: None,
            script: Arc::new(ScriptBuilder::new("s").step("a", noop).build()),
            source: String::new(),
        };
        assert!(valid.is_valid());
        assert_eq!(valid.steps()[0].title(), "a");
    }
}
