//! External value providers.
//!
//! Scripts sometimes need values that must not live in the script itself, such
//! as lock screen credentials. A [`ValueProvider`] is handed to the runner and
//! queried by key through [`DeviceContext::provider`](crate::context::DeviceContext::provider).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Source of named values for a run.
#[async_trait]
pub trait ValueProvider: Send + Sync {
    /// Fetch the value stored under `key`.
    ///
    /// An unknown key is an [`Error::Provider`].
    async fn value(&self, key: &str) -> Result<String>;
}

/// In-memory provider.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    values: HashMap<String, String>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticProvider {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[async_trait]
impl ValueProvider for StaticProvider {
    async fn value(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Provider(format!("no value for key '{}'", key)))
    }
}
