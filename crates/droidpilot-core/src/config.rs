//! Persistent configuration for droidpilot.
//!
//! Stores user settings in `~/.droidpilot/config.json`. These are the defaults
//! the device context falls back to when a script does not spell them out:
//! where screen-anchored scrolls start, how fast they go, and how long a long
//! press lasts.
//!
//! # Example
//!
//! ```no_run
//! use droidpilot_core::config::DroidpilotConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let mut config = DroidpilotConfig::load();
//! config.scroll_anchor = (720, 1280);
//! config.save().unwrap();
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const CONFIG_FILENAME: &str = "config.json";

/// Polling interval used by every wait/poll loop.
pub const WAIT_POLL_INTERVAL_MS: u64 = 250;

/// Delay after a scroll gesture before the screen is captured again.
pub const SCROLL_SETTLE_MS: u64 = 300;

/// Returns the droidpilot data directory (`~/.droidpilot`), creating it if needed.
///
/// Falls back to a relative `.droidpilot` when the home directory is unknown.
pub fn droidpilot_dir() -> PathBuf {
    let dir = dirs::home_dir().unwrap_or_default().join(".droidpilot");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Persistent droidpilot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroidpilotConfig {
    /// Start point of screen-anchored scrolls. Defaults to the middle of a
    /// 1080x1920 screen.
    pub scroll_anchor: (i32, i32),
    /// Scroll speed from 1 (slow) to 10 (fast).
    pub scroll_speed: u8,
    /// Default long press duration.
    pub long_tap_ms: u64,
}

impl Default for DroidpilotConfig {
    fn default() -> Self {
        Self {
            scroll_anchor: (540, 960),
            scroll_speed: 5,
            long_tap_ms: 2000,
        }
    }
}

impl DroidpilotConfig {
    /// Load config from `~/.droidpilot/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        let path = droidpilot_dir().join(CONFIG_FILENAME);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.droidpilot/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        let path = droidpilot_dir().join(CONFIG_FILENAME);
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = DroidpilotConfig::default();
        assert_eq!(config.scroll_anchor, (540, 960));
        assert_eq!(config.scroll_speed, 5);
        assert_eq!(config.long_tap_ms, 2000);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let loaded: DroidpilotConfig = serde_json::from_str(r#"{"scroll_speed": 8}"#).unwrap();
        assert_eq!(loaded.scroll_speed, 8);
        assert_eq!(loaded.long_tap_ms, 2000);
    }

    #[test]
    fn deserialize_empty_json() {
        let loaded: DroidpilotConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, DroidpilotConfig::default());
    }

    #[test]
    fn load_does_not_panic_without_file() {
        let _ = DroidpilotConfig::load();
    }
}
