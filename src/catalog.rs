//! Catalog synchronization.
//!
//! Keeps the single authoritative local copy of the signed token catalog in
//! sync with a remote source of truth. The local copy is only ever replaced
//! wholesale (same-directory temp file + rename), and only when a verified
//! remote document carries a strictly greater version. Every failure here is
//! recoverable: card support degrades, startup is never blocked.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::envelope::EnvelopeVerifier;
use crate::types::{Result, TrustError};
use crate::version;

/// A catalog of recognized hardware tokens.
///
/// Only the version is interpreted here; the token entries are opaque to the
/// trust layer and handed to the proxy as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    /// Semantic version of the document; absent is treated as `0.0.0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Everything else in the document (token entries, driver mappings, ...)
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

impl Catalog {
    /// Parsed version, defaulting to `0.0.0`
    pub fn semver(&self, context: &str) -> semver::Version {
        version::parse_or_zero(self.version.as_deref(), context)
    }
}

/// Fetches, verifies and installs catalog updates
pub struct CatalogSynchronizer {
    client: reqwest::Client,
    link: String,
    local_path: PathBuf,
    bundled: Option<PathBuf>,
    verifier: EnvelopeVerifier,
}

impl CatalogSynchronizer {
    /// Create a synchronizer with a bounded fetch timeout
    pub fn new(
        link: String,
        local_path: PathBuf,
        bundled: Option<PathBuf>,
        verifier: EnvelopeVerifier,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| TrustError::Network(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            link,
            local_path,
            bundled,
            verifier,
        })
    }

    /// Run one synchronization pass.
    ///
    /// Never escalates: every failure is logged and the local state is left
    /// in the best shape reachable (verified remote > existing local >
    /// bundled default > empty).
    pub async fn synchronize(&self) {
        let remote = self.fetch_remote().await;
        self.apply(remote);
    }

    /// Fetch and verify the remote catalog
    async fn fetch_remote(&self) -> Result<Catalog> {
        let response = self
            .client
            .get(&self.link)
            .send()
            .await
            .map_err(|e| TrustError::Network(format!("GET {}: {e}", self.link)))?
            .error_for_status()
            .map_err(|e| TrustError::Network(format!("GET {}: {e}", self.link)))?;

        let envelope = response
            .text()
            .await
            .map_err(|e| TrustError::Network(format!("reading {}: {e}", self.link)))?;

        Ok(self.verifier.verify_json::<Catalog>(&envelope)?)
    }

    /// Apply a fetch result to the local state.
    ///
    /// Split from [`synchronize`](Self::synchronize) so the decision logic is
    /// testable without a network.
    pub(crate) fn apply(&self, remote: Result<Catalog>) {
        if !self.local_path.exists() {
            match remote {
                Ok(catalog) => match self.install(&catalog) {
                    Ok(()) => info!("Catalog installed from {}", self.link),
                    Err(e) => {
                        error!("Cannot install catalog from {}: {}", self.link, e);
                        self.install_bundled();
                    }
                },
                Err(e) => {
                    error!("Cannot get catalog from {}: {}", self.link, e);
                    self.install_bundled();
                }
            }
            return;
        }

        // Local copy exists: replace only on a strictly greater verified version.
        info!("Comparing local catalog version with remote");
        let local_version = match self.local_version() {
            Ok(v) => v,
            Err(e) => {
                error!("Cannot read local catalog: {}", e);
                return;
            }
        };

        match remote {
            Ok(catalog) => {
                let remote_version = catalog.semver("remote catalog");
                if version::is_newer(&remote_version, &local_version) {
                    match self.install(&catalog) {
                        Ok(()) => info!(
                            "Catalog replaced: {} -> {} from {}",
                            local_version, remote_version, self.link
                        ),
                        Err(e) => error!("Cannot replace catalog: {}", e),
                    }
                } else {
                    info!("Catalog has the latest version ({})", local_version);
                }
            }
            Err(e) => {
                error!("Cannot get catalog from {}: {}", self.link, e);
            }
        }
    }

    /// Version of the existing local copy
    fn local_version(&self) -> Result<semver::Version> {
        let raw = std::fs::read_to_string(&self.local_path)?;
        let catalog: Catalog = serde_json::from_str(&raw)
            .map_err(|e| TrustError::Version(format!("local catalog: {e}")))?;
        Ok(catalog.semver("local catalog"))
    }

    /// Atomically replace the local copy with `catalog`
    fn install(&self, catalog: &Catalog) -> Result<()> {
        let raw = serde_json::to_string_pretty(catalog)
            .map_err(|e| TrustError::Version(format!("serializing catalog: {e}")))?;
        atomic_write(&self.local_path, raw.as_bytes())?;
        Ok(())
    }

    /// Fall back to the bundled default copy, if one is shipped
    fn install_bundled(&self) {
        let Some(ref bundled) = self.bundled else {
            error!("No bundled catalog available, catalog support left empty");
            return;
        };
        if !bundled.exists() {
            error!(
                "Bundled catalog {} not found, catalog support left empty",
                bundled.display()
            );
            return;
        }

        match std::fs::read(bundled).and_then(|bytes| atomic_write(&self.local_path, &bytes)) {
            Ok(()) => info!("Catalog installed from bundled copy {}", bundled.display()),
            Err(e) => error!(
                "Cannot install bundled catalog {}: {}",
                bundled.display(),
                e
            ),
        }
    }
}

/// Write a file through a same-directory temp file and rename
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{seal, EnvelopeVerifier};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    struct Fixture {
        _dir: tempfile::TempDir,
        local: PathBuf,
        bundled: PathBuf,
        sync: CatalogSynchronizer,
        signing: SigningKey,
    }

    fn fixture(with_bundled: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("card.json");
        let bundled = dir.path().join("bundled.json");
        if with_bundled {
            std::fs::write(&bundled, r#"{"version":"0.1.0","cards":[]}"#).unwrap();
        }

        let signing = SigningKey::generate(&mut OsRng);
        let sync = CatalogSynchronizer::new(
            "https://unused.example/card.jws".into(),
            local.clone(),
            with_bundled.then(|| bundled.clone()),
            EnvelopeVerifier::new(signing.verifying_key()),
            Duration::from_secs(5),
        )
        .unwrap();

        Fixture {
            _dir: dir,
            local,
            bundled,
            sync,
            signing,
        }
    }

    fn catalog(version: &str) -> Catalog {
        serde_json::from_value(serde_json::json!({"version": version, "cards": []})).unwrap()
    }

    fn local_version(path: &Path) -> Option<String> {
        let raw = std::fs::read_to_string(path).ok()?;
        let catalog: Catalog = serde_json::from_str(&raw).ok()?;
        catalog.version
    }

    #[test]
    fn test_no_local_copy_installs_remote() {
        let f = fixture(false);
        f.sync.apply(Ok(catalog("1.2.0")));

        assert_eq!(local_version(&f.local).as_deref(), Some("1.2.0"));
    }

    #[test]
    fn test_no_local_copy_falls_back_to_bundled_on_fetch_failure() {
        let f = fixture(true);
        f.sync.apply(Err(TrustError::Network("timeout".into())));

        assert_eq!(local_version(&f.local).as_deref(), Some("0.1.0"));
        assert!(f.bundled.exists());
    }

    #[test]
    fn test_no_local_copy_and_no_bundled_leaves_catalog_empty() {
        let f = fixture(false);
        f.sync.apply(Err(TrustError::Network("timeout".into())));

        assert!(!f.local.exists());
    }

    #[test]
    fn test_strictly_newer_remote_replaces_local() {
        let f = fixture(false);
        f.sync.apply(Ok(catalog("1.0.0")));
        f.sync.apply(Ok(catalog("1.1.0")));

        assert_eq!(local_version(&f.local).as_deref(), Some("1.1.0"));
    }

    #[test]
    fn test_equal_or_older_remote_keeps_local() {
        let f = fixture(false);
        f.sync.apply(Ok(catalog("1.1.0")));

        f.sync.apply(Ok(catalog("1.1.0")));
        assert_eq!(local_version(&f.local).as_deref(), Some("1.1.0"));

        f.sync.apply(Ok(catalog("1.0.9")));
        assert_eq!(local_version(&f.local).as_deref(), Some("1.1.0"));
    }

    #[test]
    fn test_fetch_failure_leaves_existing_local_untouched() {
        let f = fixture(true);
        f.sync.apply(Ok(catalog("1.0.0")));

        f.sync.apply(Err(TrustError::Network("unreachable".into())));
        assert_eq!(local_version(&f.local).as_deref(), Some("1.0.0"));

        f.sync
            .apply(Err(crate::envelope::EnvelopeError::InvalidSignature.into()));
        assert_eq!(local_version(&f.local).as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_versionless_local_is_replaced_by_any_versioned_remote() {
        let f = fixture(false);
        std::fs::write(&f.local, r#"{"cards":[]}"#).unwrap();

        f.sync.apply(Ok(catalog("0.0.1")));
        assert_eq!(local_version(&f.local).as_deref(), Some("0.0.1"));
    }

    #[test]
    fn test_verify_rejects_tampered_remote_envelope() {
        let f = fixture(false);
        f.sync.apply(Ok(catalog("1.0.0")));

        // A remote signed by a different key never changes the local version.
        let rogue = SigningKey::generate(&mut OsRng);
        let envelope = seal(br#"{"version":"9.9.9","cards":[]}"#, &rogue);
        let result = f
            .sync
            .verifier
            .verify_json::<Catalog>(&envelope)
            .map_err(TrustError::from);
        f.sync.apply(result);

        assert_eq!(local_version(&f.local).as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_envelope_signed_by_trusted_key_is_accepted() {
        let f = fixture(false);
        let envelope = seal(br#"{"version":"2.0.0","cards":[]}"#, &f.signing);
        let result = f
            .sync
            .verifier
            .verify_json::<Catalog>(&envelope)
            .map_err(TrustError::from);
        f.sync.apply(result);

        assert_eq!(local_version(&f.local).as_deref(), Some("2.0.0"));
    }
}
