//! Pre-flight size estimation.
//!
//! Fetches the package indexes a mirror run would download, sums the declared
//! package sizes, and reports the projected disk usage.  The estimate is
//! advisory: every per-index failure is logged and skipped, so the result
//! may undercount but the call itself never fails.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::index::{self, IndexTotals};
use super::url::{self, BEARER_LOGIN};
use crate::config::{Architecture, Config, Release};
use crate::contract::Entitlement;
use crate::credentials::ResourceTokenStore;

/// Result of a size estimate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeEstimate {
    pub bytes: u64,
    pub readable: String,
    pub packages: u64,
    /// Credential-free repository lines covered by the estimate.
    pub repo_lines: Vec<String>,
}

/// One package index to fetch.
#[derive(Clone, PartialEq, Eq)]
pub struct IndexFetch {
    pub url: String,
    pub token: String,
    pub suite: String,
    pub arch: Architecture,
}

impl std::fmt::Debug for IndexFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFetch")
            .field("url", &self.url)
            .field("suite", &self.suite)
            .field("arch", &self.arch)
            .finish_non_exhaustive()
    }
}

/// Work derived from contract data before any network access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EstimatePlan {
    pub fetches: Vec<IndexFetch>,
    pub repo_lines: Vec<String>,
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

pub struct SizeEstimator {
    client: reqwest::Client,
    max_concurrent: usize,
    release: Release,
    architectures: Vec<Architecture>,
    entitlements: Vec<String>,
}

impl SizeEstimator {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.estimator.user_agent.clone())
            .timeout(Duration::from_secs(config.estimator.timeout_secs))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            max_concurrent: config.estimator.max_concurrent_fetches.max(1),
            release: config.release,
            architectures: config.effective_architectures(),
            entitlements: config.entitlements.clone(),
        })
    }

    fn is_requested(&self, repo_path: &str) -> bool {
        self.entitlements.iter().any(|e| e == repo_path)
    }

    /// Work out which indexes to fetch.
    ///
    /// An entitlement contributes when it is entitled, carries an `aptURL`,
    /// is requested, and has a resource token.  Each of its suites containing
    /// the release codename is paired with every requested architecture.
    pub fn plan(&self, contract: &[Entitlement], tokens: &ResourceTokenStore) -> EstimatePlan {
        let codename = self.release.codename();
        let mut plan = EstimatePlan::default();

        for ent in contract {
            let repo_path = ent.repo_path();
            let Some(apt_url) = ent.apt_url.as_deref() else {
                continue;
            };
            if !ent.entitled || !self.is_requested(repo_path) {
                continue;
            }
            let Some(token) = tokens.get(&ent.kind) else {
                warn!(entitlement = %ent.kind, "no resource token for entitlement; skipping");
                continue;
            };

            let base = url::normalize_apt_url(repo_path, apt_url);
            let mut matched = false;
            for suite in ent.matching_suites(codename) {
                matched = true;
                for &arch in &self.architectures {
                    let line = if arch.is_source() {
                        format!("deb-src {base} {suite} main")
                    } else {
                        format!("deb [arch={arch}] {base} {suite} main")
                    };
                    plan.repo_lines.push(line);
                    plan.fetches.push(IndexFetch {
                        url: format!("{base}{}", index::index_path(suite, arch)),
                        token: token.to_string(),
                        suite: suite.to_string(),
                        arch,
                    });
                }
            }
            if !matched {
                debug!(entitlement = %ent.kind, release = codename, "no suites match release");
            }
        }
        plan
    }

    /// Estimate the download size for the requested entitlements.
    #[instrument(skip_all, fields(release = %self.release))]
    pub async fn estimate(
        &self,
        contract: &[Entitlement],
        tokens: &ResourceTokenStore,
    ) -> SizeEstimate {
        let plan = self.plan(contract, tokens);
        info!(
            indexes = plan.fetches.len(),
            "estimating mirror size; this may take a few minutes"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for fetch in plan.fetches {
            let client = self.client.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                fetch_index_totals(&client, &fetch).await
            });
        }

        let mut totals = IndexTotals::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(t)) => totals += t,
                Ok(None) => {}
                Err(e) => debug!(error = %e, "index fetch task failed"),
            }
        }

        let estimate = SizeEstimate {
            bytes: totals.bytes,
            readable: human_readable(totals.bytes),
            packages: totals.packages,
            repo_lines: plan.repo_lines,
        };
        info!(
            bytes = estimate.bytes,
            packages = estimate.packages,
            readable = %estimate.readable,
            "mirror size estimated"
        );
        estimate
    }
}

/// Fetch and summarise one index.  `None` on any failure.
async fn fetch_index_totals(client: &reqwest::Client, fetch: &IndexFetch) -> Option<IndexTotals> {
    let resp = match client
        .get(&fetch.url)
        .basic_auth(BEARER_LOGIN, Some(&fetch.token))
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            debug!(url = %fetch.url, error = %e, "error fetching package index");
            return None;
        }
    };

    if resp.status() != reqwest::StatusCode::OK {
        debug!(url = %fetch.url, status = %resp.status(), "could not access package index");
        return None;
    }

    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(e) => {
            debug!(url = %fetch.url, error = %e, "error reading package index");
            return None;
        }
    };

    match index::summarize_gzip_index(&body) {
        Ok(totals) => {
            debug!(
                suite = %fetch.suite,
                arch = %fetch.arch,
                packages = totals.packages,
                mb = %format!("{:.2}", totals.bytes as f64 / MIB),
                "package index summarised"
            );
            Some(totals)
        }
        Err(e) => {
            debug!(url = %fetch.url, error = %e, "error parsing package index");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Two-decimal KB/MB/GB rendering (binary multiples).
pub fn human_readable(bytes: u64) -> String {
    let b = bytes as f64;
    if b < MIB {
        format!("{:.2} KB", b / KIB)
    } else if b < GIB {
        format!("{:.2} MB", b / MIB)
    } else {
        format!("{:.2} GB", b / GIB)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::Router;
    use chrono::Utc;

    use super::*;
    use crate::mirror::index::tests::gzip;
    use crate::mirror::list::MirrorListBuilder;

    type Fixtures = Arc<HashMap<String, (&'static str, Vec<u8>)>>;

    async fn index_handler(
        State(fixtures): State<Fixtures>,
        uri: Uri,
        headers: HeaderMap,
    ) -> (StatusCode, Vec<u8>) {
        let Some((auth, body)) = fixtures.get(uri.path()) else {
            return (StatusCode::NOT_FOUND, Vec::new());
        };
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != *auth {
            return (StatusCode::UNAUTHORIZED, Vec::new());
        }
        (StatusCode::OK, body.clone())
    }

    async fn serve(fixtures: HashMap<String, (&'static str, Vec<u8>)>) -> String {
        let app = Router::new()
            .fallback(index_handler)
            .with_state(Arc::new(fixtures));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn estimator(archs: &[Architecture], ents: &[&str]) -> SizeEstimator {
        let mut config = Config::default();
        config.architectures = archs.to_vec();
        config.entitlements = ents.iter().map(|s| s.to_string()).collect();
        config.estimator.timeout_secs = 5;
        SizeEstimator::new(&config).unwrap()
    }

    fn entitlement(kind: &str, entitled: bool, apt_url: Option<&str>, suites: &[&str]) -> Entitlement {
        Entitlement {
            kind: kind.to_string(),
            entitled,
            suites: suites.iter().map(|s| s.to_string()).collect(),
            apt_url: apt_url.map(str::to_string),
            apt_key: None,
        }
    }

    fn tokens(pairs: &[(&str, &str)]) -> ResourceTokenStore {
        pairs.iter().copied().collect()
    }

    #[test]
    fn human_readable_units() {
        assert_eq!(human_readable(0), "0.00 KB");
        assert_eq!(human_readable(1536), "1.50 KB");
        assert_eq!(human_readable(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(human_readable(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn plan_matches_suites_by_substring() {
        let est = estimator(&[Architecture::Amd64, Architecture::Source], &["infra"]);
        let contract = vec![entitlement(
            "esm-infra",
            true,
            Some("https://esm.ubuntu.com/infra"),
            &["jammy-infra-security", "jammy-infra-updates", "focal-infra-security"],
        )];
        let plan = est.plan(&contract, &tokens(&[("esm-infra", "T")]));

        assert_eq!(
            plan.repo_lines,
            vec![
                "deb [arch=amd64] https://esm.ubuntu.com/infra/ubuntu/ jammy-infra-security main",
                "deb-src https://esm.ubuntu.com/infra/ubuntu/ jammy-infra-security main",
                "deb [arch=amd64] https://esm.ubuntu.com/infra/ubuntu/ jammy-infra-updates main",
                "deb-src https://esm.ubuntu.com/infra/ubuntu/ jammy-infra-updates main",
            ]
        );
        assert_eq!(
            plan.fetches[0].url,
            "https://esm.ubuntu.com/infra/ubuntu/dists/jammy-infra-security/main/binary-amd64/Packages.gz"
        );
        assert_eq!(
            plan.fetches[1].url,
            "https://esm.ubuntu.com/infra/ubuntu/dists/jammy-infra-security/main/source/Sources.gz"
        );
        assert!(plan.fetches.iter().all(|f| f.token == "T"));
    }

    #[test]
    fn plan_skips_ineligible_entitlements() {
        let est = estimator(&[Architecture::Amd64], &["infra", "apps", "fips", "cis"]);
        let contract = vec![
            entitlement("esm-apps", false, Some("https://esm.ubuntu.com/apps"), &["jammy"]),
            entitlement("fips", true, None, &["jammy"]),
            entitlement("cis", true, Some("https://esm.ubuntu.com/cis"), &["jammy"]),
            entitlement("esm-infra", true, Some("https://esm.ubuntu.com/infra"), &["jammy"]),
            entitlement("usg", true, Some("https://esm.ubuntu.com/usg"), &["jammy"]),
        ];
        // cis has no token, usg is not requested.
        let plan = est.plan(
            &contract,
            &tokens(&[("esm-apps", "A"), ("fips", "F"), ("esm-infra", "I"), ("usg", "U")]),
        );
        assert_eq!(plan.fetches.len(), 1);
        assert_eq!(plan.fetches[0].token, "I");
    }

    #[test]
    fn fetch_debug_hides_token() {
        let fetch = IndexFetch {
            url: "https://x/".to_string(),
            token: "SECRET".to_string(),
            suite: "jammy".to_string(),
            arch: Architecture::Amd64,
        };
        assert!(!format!("{fetch:?}").contains("SECRET"));
    }

    #[test]
    fn estimator_and_mirror_list_disagree_on_suites() {
        // The mirror list always uses the bare codename, while the estimate
        // follows the contract's suites.  Both behaviours are kept.
        let contract = vec![entitlement(
            "esm-infra",
            true,
            Some("https://esm.ubuntu.com/infra"),
            &["jammy-infra-security"],
        )];
        let store = tokens(&[("esm-infra", "T")]);

        let plan = estimator(&[Architecture::Amd64], &["infra"]).plan(&contract, &store);
        assert!(plan.repo_lines[0].contains(" jammy-infra-security main"));

        let doc = MirrorListBuilder::new(
            Release::Jammy,
            vec![Architecture::Amd64],
            vec!["infra".to_string()],
        )
        .render(&store, Utc::now())
        .contents;
        assert!(doc.contains(" jammy main\n"));
        assert!(!doc.contains("jammy-infra-security"));
    }

    #[tokio::test]
    async fn estimate_sums_fetched_indexes() {
        let packages = "Package: a\nSize: 1000\n\nPackage: b\nSize: 24\n\n";
        let sources = "Package: a\nSize: 2048\n";
        let mut fixtures = HashMap::new();
        fixtures.insert(
            "/infra/ubuntu/dists/jammy-infra-security/main/binary-amd64/Packages.gz".to_string(),
            ("Basic YmVhcmVyOlRPSzE=", gzip(packages)),
        );
        fixtures.insert(
            "/infra/ubuntu/dists/jammy-infra-security/main/source/Sources.gz".to_string(),
            ("Basic YmVhcmVyOlRPSzE=", gzip(sources)),
        );
        let base = serve(fixtures).await;

        let est = estimator(&[Architecture::Amd64, Architecture::Source], &["infra"]);
        let contract = vec![entitlement(
            "esm-infra",
            true,
            Some(&format!("{base}/infra")),
            &["jammy-infra-security"],
        )];
        let result = est.estimate(&contract, &tokens(&[("esm-infra", "TOK1")])).await;

        assert_eq!(result.bytes, 3072);
        assert_eq!(result.packages, 3);
        assert_eq!(result.readable, "3.00 KB");
        assert_eq!(result.repo_lines.len(), 2);
    }

    #[tokio::test]
    async fn failed_fetches_are_skipped() {
        let mut fixtures = HashMap::new();
        fixtures.insert(
            "/infra/ubuntu/dists/jammy-infra-security/main/binary-amd64/Packages.gz".to_string(),
            ("Basic YmVhcmVyOlRPSzE=", gzip("Package: a\nSize: 10\n")),
        );
        // Not gzip: parse failure.
        fixtures.insert(
            "/infra/ubuntu/dists/jammy-infra-updates/main/binary-amd64/Packages.gz".to_string(),
            ("Basic YmVhcmVyOlRPSzE=", b"Package: a\nSize: 99\n".to_vec()),
        );
        // Wrong credentials: 401.
        fixtures.insert(
            "/apps/ubuntu/dists/jammy-apps-security/main/binary-amd64/Packages.gz".to_string(),
            ("Basic YmVhcmVyOlRPSzE=", gzip("Package: b\nSize: 500\n")),
        );
        let base = serve(fixtures).await;

        let est = estimator(&[Architecture::Amd64, Architecture::Arm64], &["infra", "apps"]);
        let contract = vec![
            entitlement(
                "esm-infra",
                true,
                Some(&format!("{base}/infra")),
                &["jammy-infra-security", "jammy-infra-updates"],
            ),
            entitlement(
                "esm-apps",
                true,
                Some(&format!("{base}/apps")),
                &["jammy-apps-security"],
            ),
        ];
        let result = est
            .estimate(
                &contract,
                &tokens(&[("esm-infra", "TOK1"), ("esm-apps", "TOK2")]),
            )
            .await;

        assert_eq!(result.bytes, 10);
        assert_eq!(result.packages, 1);
        // arm64 indexes 404 but their lines are still listed.
        assert_eq!(result.repo_lines.len(), 6);
    }

    #[tokio::test]
    async fn oversized_indexes_saturate_instead_of_failing() {
        let huge = format!("Package: a\nSize: {}\n", u64::MAX);
        let mut fixtures = HashMap::new();
        for suite in ["jammy", "jammy-updates"] {
            fixtures.insert(
                format!("/infra/ubuntu/dists/{suite}/main/binary-amd64/Packages.gz"),
                ("Basic YmVhcmVyOlRPSzE=", gzip(&huge)),
            );
        }
        let base = serve(fixtures).await;

        let est = estimator(&[Architecture::Amd64], &["infra"]);
        let contract = vec![entitlement(
            "esm-infra",
            true,
            Some(&format!("{base}/infra")),
            &["jammy", "jammy-updates"],
        )];
        let result = est.estimate(&contract, &tokens(&[("esm-infra", "TOK1")])).await;

        assert_eq!(result.bytes, u64::MAX);
        assert_eq!(result.packages, 2);
        assert!(result.readable.ends_with(" GB"));
    }

    #[tokio::test]
    async fn unentitled_contributes_nothing() {
        let mut fixtures = HashMap::new();
        fixtures.insert(
            "/apps/ubuntu/dists/jammy-apps-security/main/binary-amd64/Packages.gz".to_string(),
            ("Basic YmVhcmVyOlRPSzI=", gzip("Package: b\nSize: 500\n")),
        );
        let base = serve(fixtures).await;

        let est = estimator(&[Architecture::Amd64], &["apps"]);
        let contract = vec![entitlement(
            "esm-apps",
            false,
            Some(&format!("{base}/apps")),
            &["jammy-apps-security"],
        )];
        let result = est.estimate(&contract, &tokens(&[("esm-apps", "TOK2")])).await;

        assert_eq!(result.bytes, 0);
        assert_eq!(result.packages, 0);
        assert!(result.repo_lines.is_empty());
    }

    #[tokio::test]
    async fn unreachable_host_yields_empty_estimate() {
        let est = estimator(&[Architecture::Amd64], &["infra"]);
        let contract = vec![entitlement(
            "esm-infra",
            true,
            Some("http://127.0.0.1:9/infra"),
            &["jammy"],
        )];
        let result = est.estimate(&contract, &tokens(&[("esm-infra", "T")])).await;
        assert_eq!(result.bytes, 0);
        assert_eq!(result.repo_lines.len(), 1);
    }
}
