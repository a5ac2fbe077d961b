use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use super::ContractDocument;
use crate::fsutil;
use crate::system::SystemOps;

/// Air-gapped contract exchange tool; reads `<token>:` lines on stdin and
/// prints the contract document as YAML.
const PRO_AIRGAPPED: &str = "/usr/bin/pro-airgapped";

/// Exchange `token` for its contract document through the external
/// `pro-airgapped` tool, persist the JSON to `dest`, and parse it.
///
/// Any failure here is fatal: every later step depends on the document.
#[instrument(skip_all, fields(dest = %dest.display()))]
pub async fn pull_contract(
    system: &dyn SystemOps,
    token: &str,
    dest: &Path,
) -> Result<ContractDocument> {
    let mut token_file =
        tempfile::NamedTempFile::new().context("failed to create temp file for contract token")?;
    writeln!(token_file, "{token}:").context("failed to write contract token")?;
    token_file.flush()?;

    let pipeline = format!(
        "cat '{}' | {PRO_AIRGAPPED} | yq -o=json",
        token_file.path().display()
    );
    let json = system
        .run_command("sh", &["-c", &pipeline])
        .await
        .context("contract exchange failed")?;

    let document = ContractDocument::from_json(&json)?;
    fsutil::write_with_mode(dest, &json, fsutil::MODE_PRIVATE)
        .context("failed to persist contract data")?;

    info!(
        entitlements = document.entitlements().len(),
        "contract data saved"
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::tests::SAMPLE;
    use crate::system::fake::FakeSystem;

    #[tokio::test]
    async fn pull_persists_and_parses() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("pop.json");
        let system = FakeSystem::with_output("sh", SAMPLE);

        let doc = pull_contract(&system, "TOKEN", &dest).await.unwrap();
        assert_eq!(doc.entitlements().len(), 3);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), SAMPLE);

        let calls = system.commands();
        assert_eq!(calls.len(), 1);
        assert!(calls[0][2].contains("pro-airgapped"));
        assert!(!calls[0][2].contains("TOKEN"));
    }

    #[tokio::test]
    async fn pull_failure_is_fatal_and_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("pop.json");
        let system = FakeSystem::default();

        assert!(pull_contract(&system, "TOKEN", &dest).await.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn pull_rejects_garbage_output() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("pop.json");
        let system = FakeSystem::with_output("sh", "error: bad token");

        assert!(pull_contract(&system, "TOKEN", &dest).await.is_err());
        assert!(!dest.exists());
    }
}
