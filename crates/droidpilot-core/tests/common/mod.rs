//! Shared test helpers for droidpilot-core integration tests.
//!
//! This module provides a programmable in-memory device driver and a few
//! builders for UI trees and call logs.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use droidpilot_core::context::DeviceContext;
use droidpilot_core::driver::{DeviceDriver, ShellResult};
use droidpilot_core::element::{Bounds, UiNode, UiTree, UiTreeBuilder};
use droidpilot_core::error::DriverError;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Mock driver
// ---------------------------------------------------------------------------

/// How a canned shell command behaves.
#[derive(Clone)]
enum Reply {
    Result(ShellResult),
    /// Never completes.
    Hang,
    /// Fails at the transport level.
    Lost,
}

/// In-memory [`DeviceDriver`].
///
/// - Shell commands are answered by the most recently registered matching
///   prefix, or with an empty success.
/// - Every command is appended to a log.
/// - The UI tree comes from a list of screens. The current screen advances
///   when a command starting with the advance prefix runs (`input swipe` by
///   default), or on every fetch when `advance_on_fetch` is set. It never
///   moves past the last screen.
pub struct MockDriver {
    replies: Mutex<Vec<(String, Reply)>>,
    log: Mutex<Vec<String>>,
    screens: Mutex<Vec<UiTree>>,
    current: AtomicUsize,
    advance_prefix: Mutex<Option<String>>,
    advance_on_fetch: Mutex<bool>,
    fetches: AtomicUsize,
}

impl MockDriver {
    pub fn new() -> Self {
        let driver = Self {
            replies: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            screens: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            advance_prefix: Mutex::new(Some("input swipe".to_string())),
            advance_on_fetch: Mutex::new(false),
            fetches: AtomicUsize::new(0),
        };
        driver.respond(
            "getprop",
            0,
            "[ro.serialno]: [MOCK0001]\n\
             [ro.product.model]: [Pixel Mock]\n\
             [ro.build.version.sdk]: [34]\n",
        );
        driver
    }

    pub fn with_screens(screens: Vec<UiTree>) -> Self {
        let driver = Self::new();
        *driver.screens.lock().unwrap() = screens;
        driver
    }

    pub fn respond(&self, prefix: &str, code: i32, output: &str) {
        self.replies
            .lock()
            .unwrap()
            .push((prefix.to_string(), Reply::Result(ShellResult::new(code, output))));
    }

    /// Commands starting with `prefix` never return.
    pub fn hang_on(&self, prefix: &str) {
        self.replies.lock().unwrap().push((prefix.to_string(), Reply::Hang));
    }

    /// Commands starting with `prefix` fail with a lost connection.
    pub fn lose_connection_on(&self, prefix: &str) {
        self.replies.lock().unwrap().push((prefix.to_string(), Reply::Lost));
    }

    pub fn advance_on(&self, prefix: &str) {
        *self.advance_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    pub fn advance_on_fetch(&self) {
        *self.advance_prefix.lock().unwrap() = None;
        *self.advance_on_fetch.lock().unwrap() = true;
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Number of logged commands starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn advance(&self) {
        let last = self.screens.lock().unwrap().len().saturating_sub(1);
        let _ = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1).min(last)));
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    async fn shell(&self, command: &str) -> Result<ShellResult, DriverError> {
        self.log.lock().unwrap().push(command.to_string());

        let advance = self
            .advance_prefix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|p| command.starts_with(p));
        if advance {
            self.advance();
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Result(result)) => Ok(result),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Lost) => Err(DriverError::ConnectionLost("mock".into())),
            None => Ok(ShellResult::new(0, "")),
        }
    }

    async fn push(&self, local_path: &str, device_path: &str) -> Result<(), DriverError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("push {} {}", local_path, device_path));
        Ok(())
    }

    async fn pull(&self, device_path: &str, local_path: &str) -> Result<(), DriverError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("pull {} {}", device_path, local_path));
        Ok(())
    }

    async fn ui_tree(&self) -> Result<UiTree, DriverError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let tree = {
            let screens = self.screens.lock().unwrap();
            let index = self.current.load(Ordering::SeqCst);
            screens.get(index).cloned().unwrap_or_default()
        };
        if *self.advance_on_fetch.lock().unwrap() {
            self.advance();
        }
        Ok(tree)
    }
}

/// A context bound to `driver` with a fresh cancellation token.
pub fn context(driver: &Arc<MockDriver>) -> DeviceContext {
    DeviceContext::new(driver.clone(), CancellationToken::new())
}

// ---------------------------------------------------------------------------
// UI tree builders
// ---------------------------------------------------------------------------

pub fn node(text: &str) -> UiNode {
    UiNode {
        text: text.to_string(),
        class_name: "android.widget.TextView".to_string(),
        package_name: "com.android.settings".to_string(),
        ..UiNode::default()
    }
}

/// A screen with a toolbar title and a scrollable list holding `rows`.
///
/// Each row is 100px tall, stacked from y = 200.
pub fn list_screen(rows: &[&str]) -> UiTree {
    let mut b = UiTreeBuilder::new();
    let root = b.root(UiNode {
        class_name: "android.widget.FrameLayout".into(),
        bounds: Bounds::new(0, 0, 1080, 1920),
        ..UiNode::default()
    });
    b.child(root, UiNode { id: "toolbar".into(), ..node("Settings") });
    let list = b.child(
        root,
        UiNode {
            id: "list".into(),
            class_name: "androidx.recyclerview.widget.RecyclerView".into(),
            scrollable: true,
            bounds: Bounds::new(0, 200, 1080, 1800),
            ..UiNode::default()
        },
    );
    for (i, row) in rows.iter().enumerate() {
        let top = 200 + 100 * i as i32;
        b.child(
            list,
            UiNode {
                index: i as i32,
                id: "row".into(),
                clickable: true,
                bounds: Bounds::new(0, top, 1080, top + 100),
                ..node(row)
            },
        );
    }
    b.build()
}

/// A screen with no scrollable container.
pub fn flat_screen(texts: &[&str]) -> UiTree {
    let mut b = UiTreeBuilder::new();
    let root = b.root(UiNode {
        bounds: Bounds::new(0, 0, 1080, 1920),
        ..UiNode::default()
    });
    for text in texts {
        b.child(root, node(text));
    }
    b.build()
}

// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

/// Shared, ordered record of callback invocations.
pub type Calls = Arc<Mutex<Vec<String>>>;

pub fn calls() -> Calls {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(calls: &Calls, entry: impl Into<String>) {
    calls.lock().unwrap().push(entry.into());
}

pub fn entries(calls: &Calls) -> Vec<String> {
    calls.lock().unwrap().clone()
}

/// Typed `Ok(())` for async blocks whose error type would otherwise be ambiguous.
pub fn ok() -> droidpilot_core::Result<()> {
    Ok(())
}
