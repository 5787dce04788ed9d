//! The capability surface that script steps call.
//!
//! A [`DeviceContext`] is created by the runner for each run. It binds the
//! device driver, the run's [`VariableStore`], the captured [`DeviceInfo`], and
//! an optional [`ValueProvider`]. Every operation that talks to the device goes
//! through [`DeviceContext::guard`], which races it against the run's
//! cancellation token; once cancellation fires, the in-flight call is dropped
//! and [`Error::Cancelled`] unwinds through whatever the step was doing.
//!
//! Scrolling lives in [`crate::scroll`] and the control-flow combinators in
//! [`crate::flow`]; both extend this type.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::{DroidpilotConfig, WAIT_POLL_INTERVAL_MS};
use crate::device_info::DeviceInfo;
use crate::driver::{AndroidKey, ConfiguredWifi, DeviceDriver, DeviceOrientation, Intent, ShellResult};
use crate::element::UiElement;
use crate::error::{Error, Result, ScriptError};
use crate::provider::ValueProvider;
use crate::query::Snapshot;
use crate::variables::{FromValue, Value, VariableStore};

/// Point in time after which a poll loop gives up. A zero timeout never expires.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after_ms(timeout_ms: u64) -> Self {
        if timeout_ms == 0 {
            Deadline(None)
        } else {
            Deadline(Some(Instant::now() + Duration::from_millis(timeout_ms)))
        }
    }

    pub(crate) fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

/// Strips an optional leading `adb` or `adb shell` from a command line.
fn strip_adb_prefix(command: &str) -> &str {
    fn strip_word<'a>(s: &'a str, word: &str) -> Option<&'a str> {
        let rest = s.strip_prefix(word)?;
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            Some(rest.trim_start())
        } else {
            None
        }
    }

    let command = command.trim();
    match strip_word(command, "adb") {
        Some(rest) => strip_word(rest, "shell").unwrap_or(rest),
        None => command,
    }
}

/// Per-run façade over the device.
pub struct DeviceContext {
    driver: Arc<dyn DeviceDriver>,
    device_info: DeviceInfo,
    variables: VariableStore,
    provider: Option<Arc<dyn ValueProvider>>,
    pub(crate) config: DroidpilotConfig,
    cancel: CancellationToken,
}

impl DeviceContext {
    pub fn new(driver: Arc<dyn DeviceDriver>, cancel: CancellationToken) -> Self {
        Self {
            driver,
            device_info: DeviceInfo::default(),
            variables: VariableStore::new(),
            provider: None,
            config: DroidpilotConfig::default(),
            cancel,
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

    pub(crate) fn driver(&self) -> &Arc<dyn DeviceDriver> {
        &self.driver
    }

    pub fn config(&self) -> &DroidpilotConfig {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `fut` unless the run is cancelled first.
    ///
    /// Cancellation wins over a result that is ready at the same time.
    pub async fn guard<T, E, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res.map_err(Into::into),
        }
    }

    /// Stops observing cancellation. Used once a run enters its terminal hooks.
    pub(crate) fn disarm_cancellation(&mut self) {
        self.cancel = CancellationToken::new();
    }

    pub(crate) async fn refresh_device_info(&mut self) -> Result<()> {
        let info = self.guard(self.driver.device_info()).await?;
        debug!(model = %info.model, sdk = info.sdk_version, "device info captured");
        self.device_info = info;
        Ok(())
    }

    // Identity

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Fetch a named value from the run's provider.
    pub async fn provider(&self, key: &str) -> Result<String> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::Provider("no value provider configured".into()))?;
        self.guard(provider.value(key)).await
    }

    /// Run a raw shell command. A leading `adb` or `adb shell` is accepted and ignored.
    #[instrument(skip(self), level = "debug")]
    pub async fn adb(&self, command: &str) -> Result<ShellResult> {
        self.guard(self.driver.shell(strip_adb_prefix(command))).await
    }

    pub async fn device_properties(&self) -> Result<HashMap<String, String>> {
        self.guard(self.driver.properties()).await
    }

    // Files

    pub async fn push(&self, local_path: &str, device_path: &str) -> Result<()> {
        self.guard(self.driver.push(local_path, device_path)).await
    }

    pub async fn pull(&self, device_path: &str, local_path: &str) -> Result<()> {
        self.guard(self.driver.pull(device_path, local_path)).await
    }

    pub async fn file_or_dir_exists(&self, path: &str) -> Result<bool> {
        self.guard(self.driver.file_exists(path)).await
    }

    /// Delete a file or directory. Absent targets are not an error.
    pub async fn delete_file_or_dir(&self, path: &str) -> Result<()> {
        self.guard(self.driver.delete(path)).await
    }

    // Gestures and input

    pub async fn tap(&self, x: i32, y: i32) -> Result<()> {
        debug!(x, y, "tap");
        self.guard(self.driver.tap(x, y)).await
    }

    /// Long press at a point. Without a duration, the configured default is used.
    pub async fn long_tap(&self, x: i32, y: i32, duration_ms: Option<u64>) -> Result<()> {
        let duration_ms = duration_ms.unwrap_or(self.config.long_tap_ms);
        debug!(x, y, duration_ms, "long tap");
        self.guard(self.driver.long_tap(x, y, duration_ms)).await
    }

    /// Focus `element` and type `text` into it.
    pub async fn text(&self, text: &str, element: &UiElement) -> Result<()> {
        self.click(element).await?;
        self.guard(self.driver.input_text(text)).await
    }

    /// Type `text` into the first element matching `predicate`.
    pub async fn text_on<P>(&self, text: &str, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.find_first(predicate).await?;
        self.text(text, &element).await?;
        Ok(element)
    }

    pub async fn click(&self, element: &UiElement) -> Result<()> {
        let (x, y) = element.bounds.center();
        debug!(element = %element, "click");
        self.guard(self.driver.tap(x, y)).await
    }

    /// Click `element` only if it satisfies `condition`. Returns whether it clicked.
    pub async fn click_if<C>(&self, element: &UiElement, condition: C) -> Result<bool>
    where
        C: Fn(&UiElement) -> bool + Send + Sync,
    {
        if !condition(element) {
            debug!(element = %element, "click skipped by condition");
            return Ok(false);
        }
        self.click(element).await?;
        Ok(true)
    }

    /// Click the first element matching `predicate`.
    pub async fn click_first<P>(&self, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.find_first(predicate).await?;
        self.click(&element).await?;
        Ok(element)
    }

    /// Locate with `predicate`, click only if `condition` also holds.
    ///
    /// Fails with `PredicateNotFound` if nothing matches `predicate`; a failing
    /// `condition` is not an error.
    pub async fn click_first_if<P, C>(&self, predicate: P, condition: C) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
        C: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.find_first(predicate).await?;
        self.click_if(&element, condition).await?;
        Ok(element)
    }

    pub async fn long_click(&self, element: &UiElement) -> Result<()> {
        let (x, y) = element.bounds.center();
        self.long_tap(x, y, None).await
    }

    pub async fn long_click_if<C>(&self, element: &UiElement, condition: C) -> Result<bool>
    where
        C: Fn(&UiElement) -> bool + Send + Sync,
    {
        if !condition(element) {
            debug!(element = %element, "long click skipped by condition");
            return Ok(false);
        }
        self.long_click(element).await?;
        Ok(true)
    }

    pub async fn long_click_first<P>(&self, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.find_first(predicate).await?;
        self.long_click(&element).await?;
        Ok(element)
    }

    pub async fn long_click_first_if<P, C>(&self, predicate: P, condition: C) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
        C: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.find_first(predicate).await?;
        self.long_click_if(&element, condition).await?;
        Ok(element)
    }

    async fn set_checked(&self, element: &UiElement, checked: bool) -> Result<()> {
        if !element.checkable {
            return Err(ScriptError::ItemNotCheckable(element.to_string()).into());
        }
        if element.checked == checked {
            debug!(element = %element, checked, "already in requested state");
            return Ok(());
        }
        self.click(element).await
    }

    /// Make sure `element` is checked. No-op if it already is.
    pub async fn check(&self, element: &UiElement) -> Result<()> {
        self.set_checked(element, true).await
    }

    pub async fn check_first<P>(&self, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.find_first(predicate).await?;
        self.set_checked(&element, true).await?;
        Ok(element)
    }

    /// Make sure `element` is unchecked. No-op if it already is.
    pub async fn uncheck(&self, element: &UiElement) -> Result<()> {
        self.set_checked(element, false).await
    }

    pub async fn uncheck_first<P>(&self, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.find_first(predicate).await?;
        self.set_checked(&element, false).await?;
        Ok(element)
    }

    /// Check `element` only if it satisfies `condition`. Returns whether the
    /// condition held.
    pub async fn check_if<C>(&self, element: &UiElement, condition: C) -> Result<bool>
    where
        C: Fn(&UiElement) -> bool + Send + Sync,
    {
        self.set_checked_if(element, true, condition).await
    }

    pub async fn check_first_if<P, C>(&self, predicate: P, condition: C) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
        C: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.find_first(predicate).await?;
        self.set_checked_if(&element, true, condition).await?;
        Ok(element)
    }

    pub async fn uncheck_if<C>(&self, element: &UiElement, condition: C) -> Result<bool>
    where
        C: Fn(&UiElement) -> bool + Send + Sync,
    {
        self.set_checked_if(element, false, condition).await
    }

    pub async fn uncheck_first_if<P, C>(&self, predicate: P, condition: C) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
        C: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.find_first(predicate).await?;
        self.set_checked_if(&element, false, condition).await?;
        Ok(element)
    }

    async fn set_checked_if<C>(&self, element: &UiElement, checked: bool, condition: C) -> Result<bool>
    where
        C: Fn(&UiElement) -> bool + Send + Sync,
    {
        if !condition(element) {
            debug!(element = %element, checked, "check skipped by condition");
            return Ok(false);
        }
        self.set_checked(element, checked).await?;
        Ok(true)
    }

    pub async fn key(&self, key: AndroidKey) -> Result<()> {
        debug!(?key, "key event");
        self.guard(self.driver.key(key)).await
    }

    // Waiting

    /// Sleep for `duration_ms`, waking early on cancellation.
    pub async fn wait(&self, duration_ms: u64) -> Result<()> {
        self.guard(async {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
            Ok::<_, Error>(())
        })
        .await
    }

    /// Poll the screen until an element matches `predicate`.
    ///
    /// A `timeout_ms` of 0 waits forever. Fails with `WaitForPredicateTimeout`
    /// when the timeout expires first.
    pub async fn wait_for<P>(&self, timeout_ms: u64, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        let start = Instant::now();
        let deadline = Deadline::after_ms(timeout_ms);
        loop {
            let snapshot = self.snapshot().await?;
            if let Some(element) = snapshot.find_first_or_none(&predicate) {
                debug!(elapsed_ms = start.elapsed().as_millis() as u64, "wait_for matched");
                return Ok(element);
            }
            if deadline.expired() {
                return Err(ScriptError::WaitForPredicateTimeout { timeout_ms }.into());
            }
            self.wait(WAIT_POLL_INTERVAL_MS).await?;
        }
    }

    // Display

    pub async fn set_auto_rotate(&self, enabled: bool) -> Result<()> {
        self.guard(self.driver.set_auto_rotate(enabled)).await
    }

    pub async fn orientation(&self, orientation: DeviceOrientation) -> Result<()> {
        self.guard(self.driver.set_orientation(orientation)).await
    }

    // Packages and components

    /// Force-stop `package`. With `error_if_missing`, an uninstalled package
    /// fails with `PackageNotFound` instead of being ignored.
    pub async fn force_stop(&self, package: &str, error_if_missing: bool) -> Result<()> {
        if error_if_missing && !self.has_package(package).await? {
            return Err(ScriptError::PackageNotFound(package.to_string()).into());
        }
        self.guard(self.driver.force_stop(package)).await
    }

    /// Start `activity` of `package`. A relative activity (`.Main`) or a bare
    /// class name is resolved against the package.
    pub async fn launch_component(
        &self,
        package: &str,
        activity: &str,
        force_stop: bool,
        extras: BTreeMap<String, String>,
    ) -> Result<()> {
        if force_stop {
            self.force_stop(package, false).await?;
        }
        let component = if activity.contains('/') {
            activity.to_string()
        } else {
            format!("{}/{}", package, activity)
        };
        self.launch_component_path(&component, extras).await
    }

    /// Start a component given as `package/activity`.
    pub async fn launch_component_path(
        &self,
        component: &str,
        extras: BTreeMap<String, String>,
    ) -> Result<()> {
        let intent = Intent { component: Some(component.to_string()), extras, ..Intent::default() };
        self.launch(&intent).await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn launch(&self, intent: &Intent) -> Result<()> {
        self.guard(self.driver.start_activity(intent)).await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn broadcast(&self, intent: &Intent) -> Result<()> {
        self.guard(self.driver.broadcast(intent)).await
    }

    pub async fn packages(&self) -> Result<Vec<String>> {
        self.guard(self.driver.packages()).await
    }

    pub async fn has_package(&self, package: &str) -> Result<bool> {
        self.guard(self.driver.has_package(package)).await
    }

    /// Poll until `package` is installed. A `timeout_ms` of 0 waits forever.
    pub async fn wait_package(&self, package: &str, timeout_ms: u64) -> Result<()> {
        let deadline = Deadline::after_ms(timeout_ms);
        loop {
            if self.has_package(package).await? {
                return Ok(());
            }
            if deadline.expired() {
                return Err(ScriptError::WaitForPackageTimeout {
                    package: package.to_string(),
                    timeout_ms,
                }
                .into());
            }
            self.wait(WAIT_POLL_INTERVAL_MS).await?;
        }
    }

    // Security

    pub async fn set_google_play_protect(&self, enabled: bool) -> Result<()> {
        self.guard(self.driver.set_play_protect(enabled)).await
    }

    pub async fn set_screen_timeout(&self, duration_ms: u64) -> Result<()> {
        self.guard(self.driver.set_screen_off_timeout(duration_ms)).await
    }

    pub async fn set_lock_after_screen_off(&self, duration_ms: u64) -> Result<()> {
        self.guard(self.driver.set_lock_after_screen_off(duration_ms)).await
    }

    /// e.g. `NONE`, `PIN`, `PASSWORD`, `PATTERN`. Casing depends on the device.
    pub async fn unlock_method(&self) -> Result<String> {
        self.guard(self.driver.unlock_method()).await
    }

    pub async fn has_security_code(&self) -> Result<bool> {
        let method = self.unlock_method().await?;
        Ok(!method.eq_ignore_ascii_case("none"))
    }

    pub async fn set_pin_code(&self, pin: &str, current: Option<&str>) -> Result<()> {
        self.guard(self.driver.set_pin(pin, current)).await
    }

    pub async fn set_password(&self, password: &str, current: Option<&str>) -> Result<()> {
        self.guard(self.driver.set_password(password, current)).await
    }

    pub async fn verify_credentials(&self, credential: &str) -> Result<bool> {
        self.guard(self.driver.verify_credential(credential)).await
    }

    pub async fn clear_credentials(&self, current: &str) -> Result<()> {
        self.guard(self.driver.clear_credential(current)).await
    }

    // Wifi

    pub async fn is_wifi_activated(&self) -> Result<bool> {
        self.guard(self.driver.wifi_enabled()).await
    }

    pub async fn turn_on_wifi(&self) -> Result<()> {
        self.guard(self.driver.set_wifi_enabled(true)).await
    }

    pub async fn turn_off_wifi(&self) -> Result<()> {
        self.guard(self.driver.set_wifi_enabled(false)).await
    }

    pub async fn current_ssid(&self) -> Result<Option<String>> {
        self.guard(self.driver.current_ssid()).await
    }

    pub async fn configured_wifi(&self) -> Result<Vec<ConfiguredWifi>> {
        self.guard(self.driver.configured_networks()).await
    }

    /// Poll until the device is connected to `ssid`. A `timeout_ms` of 0 waits forever.
    pub async fn wait_for_wifi(&self, ssid: &str, timeout_ms: u64, case_sensitive: bool) -> Result<()> {
        let deadline = Deadline::after_ms(timeout_ms);
        let matches = |current: &str| {
            if case_sensitive {
                current == ssid
            } else {
                current.to_lowercase() == ssid.to_lowercase()
            }
        };
        loop {
            if let Some(current) = self.current_ssid().await? {
                if matches(&current) {
                    return Ok(());
                }
            }
            if deadline.expired() {
                return Err(ScriptError::WaitForWifiTimeout { ssid: ssid.to_string(), timeout_ms }.into());
            }
            self.wait(WAIT_POLL_INTERVAL_MS).await?;
        }
    }

    /// Forget every saved network named `ssid`. Unknown networks are ignored.
    pub async fn forget_wifi(&self, ssid: &str) -> Result<()> {
        let networks = self.configured_wifi().await?;
        for network in networks.iter().filter(|n| n.ssid == ssid) {
            debug!(id = network.id, ssid, "forgetting network");
            self.guard(self.driver.forget_network(network.id)).await?;
        }
        Ok(())
    }

    // System

    pub async fn reboot_device(&self) -> Result<()> {
        self.guard(self.driver.reboot()).await
    }

    pub async fn shutdown_device(&self) -> Result<()> {
        self.guard(self.driver.shutdown()).await
    }

    pub async fn disable_adb(&self) -> Result<()> {
        self.guard(self.driver.disable_usb_debugging()).await
    }

    pub async fn disable_developer_mode(&self) -> Result<()> {
        self.guard(self.driver.disable_developer_mode()).await
    }

    // Query

    /// Capture the current screen.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let tree = self.guard(self.driver.ui_tree()).await?;
        debug!(element_count = tree.len(), "tree captured");
        Ok(Snapshot::new(tree))
    }

    /// All elements on screen, in traversal order.
    pub async fn elements(&self) -> Result<Vec<UiElement>> {
        Ok(self.snapshot().await?.elements().collect())
    }

    pub async fn exists<P>(&self, predicate: P) -> Result<bool>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        Ok(self.snapshot().await?.exists(predicate))
    }

    /// Whether an element with the same attributes as `element` is on screen now.
    pub async fn exists_element(&self, element: &UiElement) -> Result<bool> {
        Ok(self.snapshot().await?.contains(element))
    }

    pub async fn find_first<P>(&self, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        self.snapshot().await?.find_first(predicate)
    }

    pub async fn find_first_or_none<P>(&self, predicate: P) -> Result<Option<UiElement>>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        Ok(self.snapshot().await?.find_first_or_none(predicate))
    }

    pub async fn find_all<P>(&self, predicate: P) -> Result<Vec<UiElement>>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        Ok(self.snapshot().await?.find_all(predicate))
    }

    /// First match after `start` in the snapshot `start` was taken from.
    pub fn find_first_after<P>(&self, start: &UiElement, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool,
    {
        Snapshot::find_first_after(start, predicate)
    }

    /// First match of `predicate` after the first match of `start`, on a fresh snapshot.
    pub async fn find_first_after_match<S, P>(&self, start: S, predicate: P) -> Result<UiElement>
    where
        S: Fn(&UiElement) -> bool + Send + Sync,
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        self.snapshot().await?.find_first_after_match(start, predicate)
    }

    // Variables

    pub fn get_variable<T: FromValue>(&self, name: &str) -> Result<T> {
        Ok(self.variables.get(name)?)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.set(name, value);
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }
}
