use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::contract::map_entitlement_to_repo_path;
use crate::fsutil;
use crate::system::SystemOps;

/// Mapping from raw entitlement type (as named by the contract API) to its
/// bearer resource token, kept in insertion order so every document rendered
/// from it is stable across runs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResourceTokenStore {
    entries: Vec<(String, String)>,
}

impl fmt::Debug for ResourceTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, _)| (k, "<redacted>")))
            .finish()
    }
}

impl ResourceTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the token for `kind`.  Replacing keeps the original
    /// position.
    pub fn insert(&mut self, kind: impl Into<String>, token: impl Into<String>) {
        let kind = kind.into();
        let token = token.into();
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 = token,
            None => self.entries.push((kind, token)),
        }
    }

    pub fn get(&self, kind: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, t)| t.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn contains_token(&self, token: &str) -> bool {
        self.entries.iter().any(|(_, t)| t == token)
    }

    // -----------------------------------------------------------------------
    // get-resource-tokens output
    // -----------------------------------------------------------------------

    /// Parse the output of `get-resource-tokens`.
    ///
    /// Only `key: value` lines after the `resources:` marker are taken;
    /// `server:`/`account:` lines and anything referencing the contracts
    /// server are ignored.
    pub fn parse_tool_output(output: &str) -> Self {
        let mut store = Self::new();
        let mut in_resources = false;

        for line in output.lines() {
            if line.contains("resources:") {
                in_resources = true;
                continue;
            }
            if !in_resources || line.starts_with("server:") || line.starts_with("account:") {
                continue;
            }
            if line.contains("contracts.canonical.com") {
                continue;
            }
            if let Some((key, value)) = line.trim().split_once(':') {
                store.insert(key.trim(), value.trim());
            }
        }
        store
    }

    /// Exchange the contract token for per-entitlement resource tokens via
    /// the external `get-resource-tokens` tool and persist them to `dest`.
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub async fn generate(system: &dyn SystemOps, token: &str, dest: &Path) -> Result<Self> {
        let output = system
            .run_command("get-resource-tokens", &[token])
            .await
            .context("resource token exchange failed")?;

        let store = Self::parse_tool_output(&output);
        if store.is_empty() {
            warn!("get-resource-tokens returned no resource tokens");
        }
        store.save(dest)?;
        info!(count = store.len(), "resource tokens saved");
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the store to `path` as a JSON object, owner-only.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut map = serde_json::Map::new();
        for (kind, token) in &self.entries {
            map.insert(kind.clone(), serde_json::Value::String(token.clone()));
        }
        let json = serde_json::to_string_pretty(&serde_json::Value::Object(map))
            .context("failed to serialise resource tokens")?;
        fsutil::write_with_mode(path, &json, fsutil::MODE_PRIVATE)
            .with_context(|| format!("failed to save resource tokens: {}", path.display()))
    }

    /// Strict load: any read or parse failure is an error.
    pub fn try_load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read resource tokens: {}", path.display()))?;
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse resource tokens: {}", path.display()))?;

        let mut store = Self::new();
        for (kind, value) in map {
            match value {
                serde_json::Value::String(token) => store.insert(kind, token),
                _ => warn!(entitlement = %kind, "ignoring non-string resource token"),
            }
        }
        Ok(store)
    }

    /// Reload tokens persisted by an earlier run.  A missing or unreadable
    /// file yields an empty store.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(store) => {
                info!(path = %path.display(), count = store.len(), "resource tokens loaded");
                store
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load resource tokens");
                Self::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Coverage
    // -----------------------------------------------------------------------

    /// Requested entitlement names with no token under either their own name
    /// or their `esm-`-prefixed contract name.
    pub fn missing_entitlements<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .map(String::as_str)
            .filter(|name| {
                !self.entries.iter().any(|(kind, _)| {
                    kind.as_str() == *name || map_entitlement_to_repo_path(kind) == *name
                })
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResourceTokenStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = Self::new();
        for (k, v) in iter {
            store.insert(k, v);
        }
        store
    }
}
