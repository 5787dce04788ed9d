//! Device driver trait for backend-agnostic Android automation.
//!
//! This module defines the [`DeviceDriver`] trait, the single seam between the
//! script engine and the device. A backend only has to provide four primitives:
//! run a shell command, push and pull files, and fetch the current UI tree.
//! Every other operation has a default implementation expressed as stock
//! Android shell commands (`input`, `settings`, `am`, `pm`, `locksettings`,
//! `svc`, `cmd wifi`, `getprop`), so a plain `adb shell` transport is enough.
//! Backends with a faster path (an on-device agent, for instance) can override
//! any of them.
//!
//! # Example
//!
//! ```no_run
//! use droidpilot_core::driver::{DeviceDriver, AndroidKey};
//!
//! async fn go_home(driver: &dyn DeviceDriver) -> Result<(), droidpilot_core::DriverError> {
//!     driver.key(AndroidKey::Home).await?;
//!     driver.force_stop("com.android.settings").await
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device_info::DeviceInfo;
use crate::element::UiTree;
use crate::error::DriverError;

/// Result of a shell command executed on the device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShellResult {
    pub result_code: i32,
    pub output: String,
}

impl ShellResult {
    pub fn new(result_code: i32, output: impl Into<String>) -> Self {
        Self { result_code, output: output.into() }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }
}

/// A wifi network saved on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredWifi {
    pub id: u32,
    pub ssid: String,
    pub encryption: String,
}

/// Screen orientation, with the `user_rotation` values Android uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceOrientation {
    Portrait,
    Landscape,
    ReversePortrait,
    ReverseLandscape,
}

impl DeviceOrientation {
    pub fn rotation(self) -> u8 {
        match self {
            DeviceOrientation::Portrait => 0,
            DeviceOrientation::Landscape => 1,
            DeviceOrientation::ReversePortrait => 2,
            DeviceOrientation::ReverseLandscape => 3,
        }
    }

    pub fn from_rotation(value: u8) -> Option<Self> {
        match value {
            0 => Some(DeviceOrientation::Portrait),
            1 => Some(DeviceOrientation::Landscape),
            2 => Some(DeviceOrientation::ReversePortrait),
            3 => Some(DeviceOrientation::ReverseLandscape),
            _ => None,
        }
    }
}

/// Hardware and navigation keys that scripts can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AndroidKey {
    Home,
    Back,
    Call,
    EndCall,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    DpadCenter,
    VolumeUp,
    VolumeDown,
    Power,
    Camera,
    Tab,
    Space,
    Enter,
    Delete,
    Menu,
    Search,
    Escape,
    AppSwitch,
    Wakeup,
    Sleep,
}

impl AndroidKey {
    /// The `KEYCODE_*` value sent with `input keyevent`.
    pub fn code(self) -> u32 {
        match self {
            AndroidKey::Home => 3,
            AndroidKey::Back => 4,
            AndroidKey::Call => 5,
            AndroidKey::EndCall => 6,
            AndroidKey::DpadUp => 19,
            AndroidKey::DpadDown => 20,
            AndroidKey::DpadLeft => 21,
            AndroidKey::DpadRight => 22,
            AndroidKey::DpadCenter => 23,
            AndroidKey::VolumeUp => 24,
            AndroidKey::VolumeDown => 25,
            AndroidKey::Power => 26,
            AndroidKey::Camera => 27,
            AndroidKey::Tab => 61,
            AndroidKey::Space => 62,
            AndroidKey::Enter => 66,
            AndroidKey::Delete => 67,
            AndroidKey::Menu => 82,
            AndroidKey::Search => 84,
            AndroidKey::Escape => 111,
            AndroidKey::AppSwitch => 187,
            AndroidKey::Wakeup => 224,
            AndroidKey::Sleep => 223,
        }
    }
}

/// An activity or broadcast intent, rendered as `am` arguments.
///
/// Extras are string-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub action: Option<String>,
    pub category: Option<String>,
    /// Full component path, `package/activity`.
    pub component: Option<String>,
    pub data: Option<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl Intent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Renders the intent as `am start` / `am broadcast` arguments.
    pub fn to_args(&self) -> String {
        let mut args = Vec::new();
        if let Some(action) = &self.action {
            args.push(format!("-a {}", shell_quote(action)));
        }
        if let Some(category) = &self.category {
            args.push(format!("-c {}", shell_quote(category)));
        }
        if let Some(data) = &self.data {
            args.push(format!("-d {}", shell_quote(data)));
        }
        if let Some(component) = &self.component {
            args.push(format!("-n {}", shell_quote(component)));
        }
        for (key, value) in &self.extras {
            args.push(format!("--es {} {}", shell_quote(key), shell_quote(value)));
        }
        args.join(" ")
    }
}

/// Wraps `value` in single quotes for the device shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Parses `getprop` output (`[key]: [value]` per line).
pub fn parse_getprop(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once("]: [")?;
            let key = key.strip_prefix('[')?;
            let value = value.strip_suffix(']')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Parses `pm list packages` output into package names.
pub fn parse_packages(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `cmd wifi list-networks` output.
///
/// The first line is a header (`Network Id SSID Security type`). Each following
/// line starts with the numeric id and ends with the security type; everything
/// in between is the SSID, which may contain spaces.
pub fn parse_wifi_networks(output: &str) -> Vec<ConfiguredWifi> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 3 {
                return None;
            }
            let id = tokens[0].parse().ok()?;
            let encryption = tokens[tokens.len() - 1].to_string();
            let ssid = tokens[1..tokens.len() - 1].join(" ");
            Some(ConfiguredWifi { id, ssid, encryption })
        })
        .collect()
}

/// Extracts the connected SSID from `cmd wifi status` output.
pub fn parse_current_ssid(output: &str) -> Option<String> {
    let start = output.find("connected to \"")? + "connected to \"".len();
    let rest = &output[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Extracts the credential type from `dumpsys lock_settings` output.
pub fn parse_unlock_method(output: &str) -> String {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("CredentialType:"))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "NONE".to_string())
}

fn parse_setting(key: &str, output: &str) -> Result<i64, DriverError> {
    let value = output.trim();
    value
        .parse()
        .map_err(|_| DriverError::Parse(format!("{}: unexpected value '{}'", key, value)))
}

/// Trait for backend-agnostic Android device automation.
///
/// Implementors provide the transport-level primitives. The trait includes
/// default implementations for all higher-level operations that work by issuing
/// Android shell commands through [`shell`](DeviceDriver::shell). Backends that
/// can do better may override any of them.
///
/// Calls from one script run are never issued concurrently, so implementations
/// do not need to serialize requests of a single run themselves.
///
/// # Required Methods
///
/// Implementors must provide: [`shell`](DeviceDriver::shell),
/// [`push`](DeviceDriver::push), [`pull`](DeviceDriver::pull),
/// and [`ui_tree`](DeviceDriver::ui_tree).
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Run a shell command on the device.
    ///
    /// A non-zero result code is not an error at this level; it is reported in
    /// the returned [`ShellResult`].
    async fn shell(&self, command: &str) -> Result<ShellResult, DriverError>;

    /// Copy a local file or directory to the device.
    ///
    /// When `device_path` is an existing directory the source keeps its file name.
    async fn push(&self, local_path: &str, device_path: &str) -> Result<(), DriverError>;

    /// Copy a file or directory from the device.
    ///
    /// When `local_path` is an existing directory the source keeps its file name.
    async fn pull(&self, device_path: &str, local_path: &str) -> Result<(), DriverError>;

    /// Capture the current UI element forest.
    async fn ui_tree(&self) -> Result<UiTree, DriverError>;

    /// Run a command and fail with [`DriverError::CommandFailed`] on a non-zero result code.
    async fn shell_checked(&self, command: &str) -> Result<String, DriverError> {
        let result = self.shell(command).await?;
        if result.is_success() {
            Ok(result.output)
        } else {
            Err(DriverError::CommandFailed(format!(
                "`{}` exited with {}: {}",
                command,
                result.result_code,
                result.output.trim()
            )))
        }
    }

    // Input

    async fn tap(&self, x: i32, y: i32) -> Result<(), DriverError> {
        self.shell_checked(&format!("input tap {} {}", x, y)).await?;
        Ok(())
    }

    /// Press at a point for `duration_ms` (a zero-distance swipe).
    async fn long_tap(&self, x: i32, y: i32, duration_ms: u64) -> Result<(), DriverError> {
        self.swipe(x, y, x, y, duration_ms).await
    }

    async fn swipe(
        &self,
        start_x: i32,
        start_y: i32,
        end_x: i32,
        end_y: i32,
        duration_ms: u64,
    ) -> Result<(), DriverError> {
        self.shell_checked(&format!(
            "input swipe {} {} {} {} {}",
            start_x, start_y, end_x, end_y, duration_ms
        ))
        .await?;
        Ok(())
    }

    /// Type text into the focused element.
    async fn input_text(&self, text: &str) -> Result<(), DriverError> {
        let escaped = text.replace(' ', "%s");
        self.shell_checked(&format!("input text {}", shell_quote(&escaped))).await?;
        Ok(())
    }

    async fn key(&self, key: AndroidKey) -> Result<(), DriverError> {
        self.shell_checked(&format!("input keyevent {}", key.code())).await?;
        Ok(())
    }

    // Files

    async fn file_exists(&self, path: &str) -> Result<bool, DriverError> {
        let result = self.shell(&format!("ls {}", shell_quote(path))).await?;
        Ok(result.is_success())
    }

    /// Delete a file or directory. Absent targets are not an error.
    async fn delete(&self, path: &str) -> Result<(), DriverError> {
        self.shell_checked(&format!("rm -rf {}", shell_quote(path))).await?;
        Ok(())
    }

    // Identity

    async fn properties(&self) -> Result<HashMap<String, String>, DriverError> {
        let output = self.shell_checked("getprop").await?;
        Ok(parse_getprop(&output))
    }

    async fn device_info(&self) -> Result<DeviceInfo, DriverError> {
        let properties = self.properties().await?;
        Ok(DeviceInfo::from_properties(&properties))
    }

    // Display

    async fn auto_rotate(&self) -> Result<bool, DriverError> {
        let output = self.shell_checked("settings get system accelerometer_rotation").await?;
        Ok(parse_setting("accelerometer_rotation", &output)? != 0)
    }

    async fn set_auto_rotate(&self, enabled: bool) -> Result<(), DriverError> {
        self.shell_checked(&format!(
            "settings put system accelerometer_rotation {}",
            u8::from(enabled)
        ))
        .await?;
        Ok(())
    }

    async fn orientation(&self) -> Result<DeviceOrientation, DriverError> {
        let output = self.shell_checked("settings get system user_rotation").await?;
        let value = parse_setting("user_rotation", &output)?;
        u8::try_from(value)
            .ok()
            .and_then(DeviceOrientation::from_rotation)
            .ok_or_else(|| DriverError::Parse(format!("user_rotation: unknown value {}", value)))
    }

    async fn set_orientation(&self, orientation: DeviceOrientation) -> Result<(), DriverError> {
        self.shell_checked(&format!(
            "settings put system user_rotation {}",
            orientation.rotation()
        ))
        .await?;
        Ok(())
    }

    // Packages and components

    async fn force_stop(&self, package: &str) -> Result<(), DriverError> {
        self.shell_checked(&format!("am force-stop {}", shell_quote(package))).await?;
        Ok(())
    }

    async fn start_activity(&self, intent: &Intent) -> Result<(), DriverError> {
        let output = self.shell_checked(&format!("am start -W {}", intent.to_args())).await?;
        if output.contains("Error:") {
            return Err(DriverError::CommandFailed(output.trim().to_string()));
        }
        Ok(())
    }

    async fn broadcast(&self, intent: &Intent) -> Result<(), DriverError> {
        self.shell_checked(&format!("am broadcast {}", intent.to_args())).await?;
        Ok(())
    }

    async fn packages(&self) -> Result<Vec<String>, DriverError> {
        let output = self.shell_checked("pm list packages").await?;
        Ok(parse_packages(&output))
    }

    async fn has_package(&self, package: &str) -> Result<bool, DriverError> {
        Ok(self.packages().await?.iter().any(|p| p == package))
    }

    // Security

    async fn screen_off_timeout(&self) -> Result<u64, DriverError> {
        let output = self.shell_checked("settings get system screen_off_timeout").await?;
        let value = parse_setting("screen_off_timeout", &output)?;
        u64::try_from(value)
            .map_err(|_| DriverError::Parse(format!("screen_off_timeout: negative value {}", value)))
    }

    async fn set_screen_off_timeout(&self, duration_ms: u64) -> Result<(), DriverError> {
        self.shell_checked(&format!("settings put system screen_off_timeout {}", duration_ms))
            .await?;
        Ok(())
    }

    async fn lock_after_screen_off(&self) -> Result<u64, DriverError> {
        let output = self
            .shell_checked("settings get secure lock_screen_lock_after_timeout")
            .await?;
        let value = parse_setting("lock_screen_lock_after_timeout", &output)?;
        u64::try_from(value).map_err(|_| {
            DriverError::Parse(format!("lock_screen_lock_after_timeout: negative value {}", value))
        })
    }

    async fn set_lock_after_screen_off(&self, duration_ms: u64) -> Result<(), DriverError> {
        self.shell_checked(&format!(
            "settings put secure lock_screen_lock_after_timeout {}",
            duration_ms
        ))
        .await?;
        Ok(())
    }

    /// The lock credential type (e.g. `NONE`, `PIN`, `PASSWORD`, `PATTERN`).
    ///
    /// Casing varies between Android versions.
    async fn unlock_method(&self) -> Result<String, DriverError> {
        let output = self.shell_checked("dumpsys lock_settings").await?;
        Ok(parse_unlock_method(&output))
    }

    async fn set_pin(&self, pin: &str, current: Option<&str>) -> Result<(), DriverError> {
        let old = old_credential_arg(current);
        self.shell_checked(&format!("locksettings set-pin{} {}", old, shell_quote(pin)))
            .await?;
        Ok(())
    }

    async fn set_password(&self, password: &str, current: Option<&str>) -> Result<(), DriverError> {
        let old = old_credential_arg(current);
        self.shell_checked(&format!(
            "locksettings set-password{} {}",
            old,
            shell_quote(password)
        ))
        .await?;
        Ok(())
    }

    async fn verify_credential(&self, credential: &str) -> Result<bool, DriverError> {
        let result = self
            .shell(&format!("locksettings verify --old {}", shell_quote(credential)))
            .await?;
        Ok(result.is_success() && result.output.contains("verified successfully"))
    }

    async fn clear_credential(&self, current: &str) -> Result<(), DriverError> {
        self.shell_checked(&format!("locksettings clear --old {}", shell_quote(current)))
            .await?;
        Ok(())
    }

    // Wifi

    async fn wifi_enabled(&self) -> Result<bool, DriverError> {
        let output = self.shell_checked("settings get global wifi_on").await?;
        Ok(parse_setting("wifi_on", &output)? != 0)
    }

    async fn set_wifi_enabled(&self, enabled: bool) -> Result<(), DriverError> {
        let verb = if enabled { "enable" } else { "disable" };
        self.shell_checked(&format!("svc wifi {}", verb)).await?;
        Ok(())
    }

    async fn configured_networks(&self) -> Result<Vec<ConfiguredWifi>, DriverError> {
        let output = self.shell_checked("cmd wifi list-networks").await?;
        Ok(parse_wifi_networks(&output))
    }

    async fn current_ssid(&self) -> Result<Option<String>, DriverError> {
        let output = self.shell_checked("cmd wifi status").await?;
        Ok(parse_current_ssid(&output))
    }

    async fn forget_network(&self, id: u32) -> Result<(), DriverError> {
        self.shell_checked(&format!("cmd wifi forget-network {}", id)).await?;
        Ok(())
    }

    // System

    async fn reboot(&self) -> Result<(), DriverError> {
        debug!("rebooting device");
        self.shell_checked("reboot").await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        debug!("shutting down device");
        self.shell_checked("reboot -p").await?;
        Ok(())
    }

    async fn disable_usb_debugging(&self) -> Result<(), DriverError> {
        self.shell_checked("settings put global adb_enabled 0").await?;
        Ok(())
    }

    async fn disable_developer_mode(&self) -> Result<(), DriverError> {
        self.shell_checked("settings put global development_settings_enabled 0")
            .await?;
        Ok(())
    }

    async fn set_play_protect(&self, enabled: bool) -> Result<(), DriverError> {
        let value = if enabled { 1 } else { -1 };
        self.shell_checked(&format!(
            "settings put global package_verifier_user_consent {}",
            value
        ))
        .await?;
        Ok(())
    }
}

fn old_credential_arg(current: Option<&str>) -> String {
    match current {
        Some(old) if !old.is_empty() => format!(" --old {}", shell_quote(old)),
        _ => String::new(),
    }
}

impl fmt::Display for DeviceOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceOrientation::Portrait => "portrait",
            DeviceOrientation::Landscape => "landscape",
            DeviceOrientation::ReversePortrait => "reverse portrait",
            DeviceOrientation::ReverseLandscape => "reverse landscape",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_getprop() {
        let output = "[ro.product.model]: [Pixel 7]\n\
                      [ro.build.version.sdk]: [34]\n\
                      [empty.value]: []\n\
                      garbage line\n";
        let props = parse_getprop(output);
        assert_eq!(props.get("ro.product.model").map(String::as_str), Some("Pixel 7"));
        assert_eq!(props.get("ro.build.version.sdk").map(String::as_str), Some("34"));
        assert_eq!(props.get("empty.value").map(String::as_str), Some(""));
        assert_eq!(props.len(), 3);
    }

    #[test]
    fn test_parse_packages() {
        let output = "package:com.android.settings\npackage:com.google.android.gms\n\n";
        assert_eq!(
            parse_packages(output),
            vec!["com.android.settings", "com.google.android.gms"]
        );
    }

    #[test]
    fn test_parse_wifi_networks_with_spaces_in_ssid() {
        let output = "Network Id      SSID                         Security type\n\
                      0            Office                        wpa2-psk\n\
                      3            Guest Network 5G              open\n";
        let networks = parse_wifi_networks(output);
        assert_eq!(networks.len(), 2);
        assert_eq!(
            networks[1],
            ConfiguredWifi { id: 3, ssid: "Guest Network 5G".into(), encryption: "open".into() }
        );
    }

    #[test]
    fn test_parse_current_ssid() {
        let output = "Wifi is enabled\nWifiInfo: SSID: \"Office\"\nWifi is connected to \"Office\"\n";
        assert_eq!(parse_current_ssid(output), Some("Office".into()));
        assert_eq!(parse_current_ssid("Wifi is disabled"), None);
    }

    #[test]
    fn test_parse_unlock_method() {
        let output = "User State:\n  CredentialType: PIN\n  SeparateChallenge: false\n";
        assert_eq!(parse_unlock_method(output), "PIN");
        assert_eq!(parse_unlock_method("nothing here"), "NONE");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_intent_args() {
        let intent = Intent::new()
            .action("android.intent.action.VIEW")
            .component("com.example/.Main")
            .extra("user", "bob");
        assert_eq!(
            intent.to_args(),
            "-a 'android.intent.action.VIEW' -n 'com.example/.Main' --es 'user' 'bob'"
        );
    }

    #[test]
    fn test_orientation_rotation_values() {
        for orientation in [
            DeviceOrientation::Portrait,
            DeviceOrientation::Landscape,
            DeviceOrientation::ReversePortrait,
            DeviceOrientation::ReverseLandscape,
        ] {
            assert_eq!(DeviceOrientation::from_rotation(orientation.rotation()), Some(orientation));
        }
        assert_eq!(DeviceOrientation::from_rotation(4), None);
    }

    #[test]
    fn test_key_codes() {
        assert_eq!(AndroidKey::Home.code(), 3);
        assert_eq!(AndroidKey::Back.code(), 4);
        assert_eq!(AndroidKey::AppSwitch.code(), 187);
    }
}
