//! Contract document model.
//!
//! The contract exchange produces a JSON document keyed by contract token,
//! each value carrying `contractInfo.resourceEntitlements`.  This module
//! parses that document into [`Entitlement`] values and owns the single
//! entitlement-name mapping rule every other module compares names with.

pub mod pull;

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

pub use pull::pull_contract;

/// Prefix carried by some entitlement types in contract data but absent from
/// repository paths (`esm-infra` is served under `/infra/`).
const ESM_PREFIX: &str = "esm-";

/// Map an entitlement name from contract data to its repository path.
///
/// Every comparison between a contract-supplied and a user-supplied
/// entitlement name goes through this function.
pub fn map_entitlement_to_repo_path(name: &str) -> &str {
    name.strip_prefix(ESM_PREFIX).unwrap_or(name)
}

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// One resource class granted by the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    /// Identifier as returned by the contract API, possibly `esm-` prefixed.
    pub kind: String,
    pub entitled: bool,
    pub suites: Vec<String>,
    pub apt_url: Option<String>,
    pub apt_key: Option<String>,
}

impl Entitlement {
    pub fn repo_path(&self) -> &str {
        map_entitlement_to_repo_path(&self.kind)
    }

    /// Suites whose name contains the release codename.
    pub fn matching_suites<'a>(&'a self, codename: &'a str) -> impl Iterator<Item = &'a str> {
        self.suites
            .iter()
            .map(String::as_str)
            .filter(move |suite| suite.contains(codename))
    }
}

/// Account metadata carried alongside the entitlements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub name: String,
    pub id: String,
    pub created_at: String,
    pub effective_from: String,
    pub effective_to: String,
}

impl Default for AccountInfo {
    fn default() -> Self {
        let unknown = || "Unknown".to_string();
        Self {
            name: unknown(),
            id: unknown(),
            created_at: unknown(),
            effective_from: unknown(),
            effective_to: unknown(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
struct ContractRecord {
    #[serde(rename = "contractInfo", default)]
    contract_info: ContractInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractInfo {
    name: Option<String>,
    id: Option<String>,
    created_at: Option<String>,
    effective_from: Option<String>,
    effective_to: Option<String>,
    #[serde(default)]
    resource_entitlements: Vec<RawEntitlement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawEntitlement {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    entitled: bool,
    #[serde(default)]
    directives: Directives,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Directives {
    #[serde(default)]
    suites: Vec<String>,
    #[serde(rename = "aptURL")]
    apt_url: Option<String>,
    #[serde(rename = "aptKey")]
    apt_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Parsed contract document, records kept in document order.
#[derive(Debug, Clone, Default)]
pub struct ContractDocument {
    records: Vec<(String, ContractRecord)>,
}

impl ContractDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(json).context("contract document is not a JSON object")?;

        let mut records = Vec::with_capacity(raw.len());
        for (token, value) in raw {
            let record: ContractRecord = serde_json::from_value(value)
                .context("malformed contract record in contract document")?;
            records.push((token, record));
        }
        Ok(Self { records })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read contract data: {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("failed to parse contract data: {}", path.display()))
    }

    /// Every resource entitlement across all contract records, in document
    /// order.  Entries without a `type` are skipped.
    pub fn entitlements(&self) -> Vec<Entitlement> {
        let mut out = Vec::new();
        for (_, record) in &self.records {
            for raw in &record.contract_info.resource_entitlements {
                let Some(kind) = raw.kind.as_deref().filter(|k| !k.is_empty()) else {
                    warn!("skipping resource entitlement without a type");
                    continue;
                };
                out.push(Entitlement {
                    kind: kind.to_string(),
                    entitled: raw.entitled,
                    suites: raw.directives.suites.clone(),
                    apt_url: raw.directives.apt_url.clone().filter(|u| !u.is_empty()),
                    apt_key: raw.directives.apt_key.clone().filter(|k| !k.is_empty()),
                });
            }
        }
        out
    }

    /// Account metadata from the first contract record.
    pub fn account_info(&self) -> AccountInfo {
        let Some((_, record)) = self.records.first() else {
            return AccountInfo::default();
        };
        let info = &record.contract_info;
        let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| "Unknown".to_string());
        AccountInfo {
            name: or_unknown(&info.name),
            id: or_unknown(&info.id),
            created_at: or_unknown(&info.created_at),
            effective_from: or_unknown(&info.effective_from),
            effective_to: or_unknown(&info.effective_to),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
