//! # droidpilot-core
//!
//! Script execution engine for Android UI automation.
//!
//! A script is an ordered list of titled steps plus optional lifecycle hooks.
//! The runner executes it against a device through a [`DeviceContext`], which
//! offers element queries, gestures, scrolling, control-flow combinators, and
//! device settings on top of a pluggable [`DeviceDriver`].
//!
//! ## Modules
//!
//! - [`element`] - Immutable UI tree snapshots and element handles
//! - [`query`] - Predicate search over a snapshot, plus predicate helpers
//! - [`scroll`] - Scroll gestures and scroll-until-found loops
//! - [`flow`] - `first_success_of`, `no_error`, `repeat_while`, explicit exits
//! - [`variables`] - Run-scoped typed variable store
//! - [`context`] - The per-run capability surface steps call
//! - [`driver`] - Device driver trait with shell-based defaults
//! - [`script`] - Steps, hooks, builder, and execution positions
//! - [`runner`] - Lifecycle state machine, run handles, and events
//! - [`config`] - Persistent defaults in `~/.droidpilot/config.json`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use droidpilot_core::{DeviceDriver, ScriptBuilder, ScriptRunner};
//! use droidpilot_core::query::by;
//! use droidpilot_core::scroll::Direction;
//!
//! async fn enable_bluetooth(driver: Arc<dyn DeviceDriver>) {
//!     let script = ScriptBuilder::new("bluetooth")
//!         .step("open settings", |ctx| Box::pin(async move {
//!             ctx.launch_component("com.android.settings", ".Settings", true, Default::default()).await
//!         }))
//!         .step("find bluetooth", |ctx| Box::pin(async move {
//!             let row = ctx.scroll_until_on_first(Direction::Down, 5, by::text("Bluetooth")).await?;
//!             ctx.click(&row).await
//!         }))
//!         .build();
//!
//!     let report = ScriptRunner::new(driver).run(&script).await;
//!     assert!(report.is_success());
//! }
//! ```

pub mod config;
pub mod context;
pub mod device_info;
pub mod driver;
pub mod element;
pub mod error;
pub mod flow;
pub mod provider;
pub mod query;
pub mod runner;
pub mod script;
pub mod scroll;
pub mod variables;

pub use context::DeviceContext;
pub use driver::DeviceDriver;
pub use element::{Bounds, UiElement, UiNode, UiTree, UiTreeBuilder};
pub use error::{DriverError, Error, ExitSignal, Result, ScriptError, VariableError};
pub use runner::{RunEvent, RunHandle, RunOutcome, RunReport, RunStatus, ScriptRunner};
pub use script::{action, CurrentStep, ScriptBuilder, ScriptDefinition, ScriptInfo, Step};
