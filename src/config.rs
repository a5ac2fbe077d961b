use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Release codenames
// ---------------------------------------------------------------------------

/// Distribution releases that carry entitlement-gated repositories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Release {
    Trusty,
    Xenial,
    Bionic,
    Focal,
    #[default]
    Jammy,
    Noble,
}

impl Release {
    pub const ALL: [Release; 6] = [
        Self::Trusty,
        Self::Xenial,
        Self::Bionic,
        Self::Focal,
        Self::Jammy,
        Self::Noble,
    ];

    pub fn codename(&self) -> &'static str {
        match self {
            Self::Trusty => "trusty",
            Self::Xenial => "xenial",
            Self::Bionic => "bionic",
            Self::Focal => "focal",
            Self::Jammy => "jammy",
            Self::Noble => "noble",
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codename())
    }
}

impl FromStr for Release {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.codename() == s.trim())
            .with_context(|| {
                format!(
                    "unsupported release '{s}' (expected one of: {})",
                    Self::ALL.map(|r| r.codename()).join(", ")
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Architectures
// ---------------------------------------------------------------------------

/// Package architecture, or the `source` pseudo-architecture that selects
/// `deb-src` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Arm64,
    Armhf,
    I386,
    Ppc64el,
    S390x,
    Riscv64,
    Source,
}

impl Architecture {
    pub const ALL: [Architecture; 8] = [
        Self::Amd64,
        Self::Arm64,
        Self::Armhf,
        Self::I386,
        Self::Ppc64el,
        Self::S390x,
        Self::Riscv64,
        Self::Source,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Armhf => "armhf",
            Self::I386 => "i386",
            Self::Ppc64el => "ppc64el",
            Self::S390x => "s390x",
            Self::Riscv64 => "riscv64",
            Self::Source => "source",
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source)
    }

    /// Architectures served from the ports archive rather than the primary one.
    pub fn is_ports(&self) -> bool {
        matches!(self, Self::Arm64 | Self::Armhf | Self::Ppc64el | Self::S390x)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim())
            .with_context(|| {
                format!(
                    "unsupported architecture '{s}' (expected one of: {})",
                    Self::ALL.map(|a| a.as_str()).join(", ")
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Pockets
// ---------------------------------------------------------------------------

/// Category of standard-distribution repository content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pocket {
    Release,
    Updates,
    Backports,
    Security,
}

impl Pocket {
    pub const ALL: [Pocket; 4] = [
        Self::Release,
        Self::Updates,
        Self::Backports,
        Self::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Updates => "updates",
            Self::Backports => "backports",
            Self::Security => "security",
        }
    }

    /// Suite name for this pocket on `release`, e.g. `jammy-updates`.
    pub fn suite(&self, release: Release) -> String {
        match self {
            Self::Release => release.codename().to_string(),
            other => format!("{}-{}", release.codename(), other.as_str()),
        }
    }
}

impl FromStr for Pocket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .with_context(|| {
                format!(
                    "unsupported pocket '{s}' (expected one of: {})",
                    Self::ALL.map(|p| p.as_str()).join(", ")
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory for contract data, credentials and generated configs.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub release: Release,
    #[serde(default = "default_architectures")]
    pub architectures: Vec<Architecture>,
    /// Append `source` to the architecture list.
    #[serde(default)]
    pub include_source: bool,
    /// Entitlement names to mirror, compared after `esm-` prefix stripping.
    #[serde(default = "default_entitlements")]
    pub entitlements: Vec<String>,
    /// PPA carrying the air-gapped tooling packages.
    #[serde(default = "default_offline_repo")]
    pub offline_repo: String,
    /// Name of the environment variable that holds the contract token.
    #[serde(default = "default_contract_token_env")]
    pub contract_token_env: String,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            release: Release::default(),
            architectures: default_architectures(),
            include_source: false,
            entitlements: default_entitlements(),
            offline_repo: default_offline_repo(),
            contract_token_env: default_contract_token_env(),
            mirror: MirrorConfig::default(),
            estimator: EstimatorConfig::default(),
        }
    }
}

impl Config {
    /// Architecture list with `source` appended when `include_source` is set.
    pub fn effective_architectures(&self) -> Vec<Architecture> {
        let mut archs = self.architectures.clone();
        if self.include_source && !archs.contains(&Architecture::Source) {
            archs.push(Architecture::Source);
        }
        archs
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.base_dir, &self.mirror.base_path)
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/srv/pop")
}

fn default_architectures() -> Vec<Architecture> {
    vec![Architecture::Amd64]
}

fn default_entitlements() -> Vec<String> {
    ["infra", "apps", "fips", "fips-updates", "fips-preview", "cis", "usg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_offline_repo() -> String {
    "ppa:yellow/ua-airgapped".to_string()
}

fn default_contract_token_env() -> String {
    "POP_CONTRACT_TOKEN".to_string()
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Host of an existing first-stage mirror to fetch from instead of the
    /// upstream origin.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_mirror_port")]
    pub port: u16,
    /// Spool directory of the mirror tool (`set base_path`).
    #[serde(default = "default_mirror_base_path")]
    pub base_path: PathBuf,
    /// Also mirror the standard distribution archive.
    #[serde(default)]
    pub standard_repos: bool,
    #[serde(default = "default_components")]
    pub components: Vec<String>,
    #[serde(default = "default_pockets")]
    pub pockets: Vec<Pocket>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_mirror_port(),
            base_path: default_mirror_base_path(),
            standard_repos: false,
            components: default_components(),
            pockets: default_pockets(),
        }
    }
}

fn default_mirror_port() -> u16 {
    80
}

fn default_mirror_base_path() -> PathBuf {
    PathBuf::from("/var/spool/apt-mirror")
}

fn default_components() -> Vec<String> {
    ["main", "restricted", "universe", "multiverse"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_pockets() -> Vec<Pocket> {
    Pocket::ALL.to_vec()
}

// ---------------------------------------------------------------------------
// Size estimation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorConfig {
    /// Per-request timeout (seconds) for package-index fetches.
    #[serde(default = "default_estimator_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on index fetches in flight at once.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_estimator_timeout(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_estimator_timeout() -> u64 {
    30
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_user_agent() -> String {
    "PoP/1.0".to_string()
}

// ---------------------------------------------------------------------------
// Resolved paths
// ---------------------------------------------------------------------------

/// Filesystem layout derived once from the configured base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub base_dir: PathBuf,
    /// Raw contract document as returned by the contract exchange.
    pub contract_json: PathBuf,
    /// Persisted entitlement-type -> resource-token mapping.
    pub resources_json: PathBuf,
    pub mirror_list: PathBuf,
    pub auth_file: PathBuf,
    pub gpg_dir: PathBuf,
    pub mirror_spool: PathBuf,
}

impl Paths {
    pub fn new(base_dir: &Path, mirror_spool: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            contract_json: base_dir.join("pop.json"),
            resources_json: base_dir.join("pop_resources.json"),
            mirror_list: base_dir.join("etc/mirror.list"),
            auth_file: base_dir.join("etc/apt/auth.conf.d/91ubuntu-pro"),
            gpg_dir: base_dir.join("etc/apt/trusted.gpg.d"),
            mirror_spool: mirror_spool.to_path_buf(),
        }
    }

    /// Directory the mirror tool downloads repository trees into.
    pub fn mirror_tree(&self) -> PathBuf {
        self.mirror_spool.join("mirror")
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load a [`Config`] from a YAML file at `path`.
///
/// Validation is left to the caller so command-line overrides can be applied
/// first; call [`validate_config`] before using the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Checks that cannot be expressed purely with serde.
pub fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.architectures.is_empty(),
        "at least one architecture must be configured"
    );
    anyhow::ensure!(
        !config.entitlements.is_empty(),
        "at least one entitlement must be configured"
    );
    anyhow::ensure!(
        config.entitlements.iter().all(|e| !e.trim().is_empty()),
        "entitlement names must not be empty"
    );
    anyhow::ensure!(config.mirror.port != 0, "mirror.port must be non-zero");
    if let Some(host) = &config.mirror.host {
        anyhow::ensure!(
            !host.trim().is_empty() && !host.contains('/'),
            "mirror.host must be a bare hostname or address, got '{host}'"
        );
    }
    if config.mirror.standard_repos {
        anyhow::ensure!(
            !config.mirror.components.is_empty() && !config.mirror.pockets.is_empty(),
            "mirror.standard_repos requires at least one component and one pocket"
        );
    }
    anyhow::ensure!(
        config.estimator.timeout_secs > 0,
        "estimator.timeout_secs must be greater than zero"
    );
    anyhow::ensure!(
        config.estimator.max_concurrent_fetches > 0,
        "estimator.max_concurrent_fetches must be greater than zero"
    );
    Ok(())
}
