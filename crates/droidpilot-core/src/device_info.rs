//! Identity snapshot of the target device.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device identity, captured once per run while the runner is `Initializing`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial_number: String,
    /// e.g. `14`
    pub android_version: String,
    /// e.g. `34`
    pub sdk_version: u32,
    pub build_date: Option<DateTime<Utc>>,
    /// e.g. `TP1A.220624.014`
    pub build_id: String,
    /// Baseband version. Not reported by every device.
    pub build_version: String,
    pub model: String,
    pub product_name: String,
    pub brand: String,
    /// e.g. `fr-FR`
    pub locale: String,
    /// e.g. `Europe/Paris`
    pub timezone: String,
    /// e.g. `2024-02-05`
    pub security_patch: String,
    pub lcd_density: u32,
}

impl DeviceInfo {
    /// Builds the snapshot from `getprop` key/value pairs. Missing or malformed
    /// properties yield empty strings, zero, or `None`.
    pub fn from_properties(props: &HashMap<String, String>) -> Self {
        let text = |key: &str| props.get(key).cloned().unwrap_or_default();
        let number = |key: &str| {
            props
                .get(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or_default()
        };

        let build_date = props
            .get("ro.build.date.utc")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        let locale = props
            .get("persist.sys.locale")
            .or_else(|| props.get("ro.product.locale"))
            .cloned()
            .unwrap_or_default();

        Self {
            serial_number: text("ro.serialno"),
            android_version: text("ro.build.version.release"),
            sdk_version: number("ro.build.version.sdk"),
            build_date,
            build_id: text("ro.build.id"),
            build_version: text("gsm.version.baseband"),
            model: text("ro.product.model"),
            product_name: text("ro.product.name"),
            brand: text("ro.product.brand"),
            locale,
            timezone: text("persist.sys.timezone"),
            security_patch: text("ro.build.version.security_patch"),
            lcd_density: number("ro.sf.lcd_density"),
        }
    }
}
