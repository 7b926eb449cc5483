//! Generation and probing of the local certificate authority material.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use rcgen::{BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, SanType};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::types::{Result, TrustError};

/// Validity window for freshly generated material (two years)
const VALIDITY_DAYS: i64 = 730;

/// Common name of the generated root
const ROOT_COMMON_NAME: &str = "Trustpoint Local Authority";

/// Common name of the generated leaf
const LEAF_COMMON_NAME: &str = "Trustpoint Local Service";

/// On-disk locations of the three certificate artifacts
#[derive(Debug, Clone)]
pub struct CertPaths {
    /// Certificate authority root
    pub root: PathBuf,
    /// Server leaf certificate
    pub cert: PathBuf,
    /// Server private key
    pub key: PathBuf,
}

/// A complete set of generated certificate material, PEM encoded.
///
/// Held in memory until all three artifacts are produced; only then is the
/// set written to disk as a batch.
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    /// Root certificate (PEM)
    pub root: String,
    /// Leaf certificate signed by the root (PEM)
    pub cert: String,
    /// Leaf private key (PEM)
    pub key: String,
}

impl CertificateMaterial {
    /// Generate a new root CA and a leaf certificate/key signed by it.
    ///
    /// The leaf is bound to `localhost` / `127.0.0.1`, where the secure
    /// server listens. Nothing touches the filesystem here.
    pub fn generate() -> Result<Self> {
        let now = OffsetDateTime::now_utc();
        Self::generate_window(now, now + Duration::days(VALIDITY_DAYS))
    }

    /// Generate material with an explicit validity window
    fn generate_window(not_before: OffsetDateTime, not_after: OffsetDateTime) -> Result<Self> {
        // Root
        let mut root_params = CertificateParams::default();
        root_params
            .distinguished_name
            .push(DnType::CommonName, ROOT_COMMON_NAME);
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        root_params.not_before = not_before;
        root_params.not_after = not_after;

        let root_key = KeyPair::generate()
            .map_err(|e| TrustError::Certificate(format!("root key generation: {e}")))?;
        let root_cert = root_params
            .self_signed(&root_key)
            .map_err(|e| TrustError::Certificate(format!("root self-signing: {e}")))?;

        // Leaf, signed by the root
        let mut leaf_params = CertificateParams::default();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, LEAF_COMMON_NAME);
        leaf_params.subject_alt_names = vec![
            SanType::DnsName(
                "localhost"
                    .try_into()
                    .map_err(|e| TrustError::Certificate(format!("leaf SAN: {e}")))?,
            ),
            SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ];
        leaf_params
            .extended_key_usages
            .push(ExtendedKeyUsagePurpose::ServerAuth);
        leaf_params.not_before = not_before;
        leaf_params.not_after = not_after;

        let leaf_key = KeyPair::generate()
            .map_err(|e| TrustError::Certificate(format!("leaf key generation: {e}")))?;
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &root_cert, &root_key)
            .map_err(|e| TrustError::Certificate(format!("leaf signing: {e}")))?;

        Ok(Self {
            root: root_cert.pem(),
            cert: leaf_cert.pem(),
            key: leaf_key.serialize_pem(),
        })
    }

    /// Load previously written material from disk
    pub fn load(paths: &CertPaths) -> Result<Self> {
        Ok(Self {
            root: std::fs::read_to_string(&paths.root)?,
            cert: std::fs::read_to_string(&paths.cert)?,
            key: std::fs::read_to_string(&paths.key)?,
        })
    }

    /// Write all three artifacts as a batch.
    ///
    /// If any single write fails, the set is rolled back so no partial
    /// material remains on disk.
    pub fn write(&self, paths: &CertPaths) -> Result<()> {
        if let Some(parent) = paths.root.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writes = [
            (&paths.root, &self.root),
            (&paths.cert, &self.cert),
            (&paths.key, &self.key),
        ];
        for (path, pem) in writes {
            if let Err(e) = std::fs::write(path, pem) {
                warn!("Writing {} failed, rolling back certificate set", path.display());
                remove_material(paths);
                return Err(e.into());
            }
        }
        Ok(())
    }
}

/// Check whether usable certificate material exists.
///
/// True iff both the certificate and key files exist, the certificate
/// parses, and its not-after timestamp is in the future. Every failure mode
/// is logged and answered with `false`, never raised.
pub fn probe(paths: &CertPaths) -> bool {
    if !paths.cert.exists() || !paths.key.exists() {
        info!("Certificate material not found");
        return false;
    }

    let pem_bytes = match std::fs::read(&paths.cert) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Cannot read certificate {}: {}", paths.cert.display(), e);
            return false;
        }
    };

    let parsed = match x509_parser::pem::parse_x509_pem(&pem_bytes) {
        Ok((_, pem)) => pem,
        Err(e) => {
            warn!("Certificate {} is not valid PEM: {}", paths.cert.display(), e);
            return false;
        }
    };
    let cert = match parsed.parse_x509() {
        Ok(cert) => cert,
        Err(e) => {
            warn!("Certificate {} does not parse: {}", paths.cert.display(), e);
            return false;
        }
    };

    if !cert.validity().is_valid() {
        info!("Certificate is expired");
        return false;
    }

    true
}

/// Delete all certificate artifacts, ignoring files that are already gone.
///
/// Used both for rollback after a failed trust-store installation and for
/// cleaning up a partial write.
pub fn remove_material(paths: &CertPaths) {
    for path in [&paths.root, &paths.cert, &paths.key] {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot remove {}: {}", path.display(), e),
        }
    }
}

/// Ensure certificate material exists on disk, generating a fresh set when
/// the probe fails.
///
/// Returns the material and whether it was freshly generated — a fresh set
/// still needs trust-store installation, which the caller gates behind a
/// human acknowledgement.
pub fn ensure_material(paths: &CertPaths) -> Result<(CertificateMaterial, bool)> {
    if probe(paths) {
        info!("Certificate material is loaded");
        return Ok((CertificateMaterial::load(paths)?, false));
    }

    info!("Generating new certificate material");
    let material = CertificateMaterial::generate()?;
    material.write(paths)?;
    Ok((material, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn paths_in(dir: &Path) -> CertPaths {
        CertPaths {
            root: dir.join("ca.pem"),
            cert: dir.join("cert.pem"),
            key: dir.join("key.pem"),
        }
    }

    #[test]
    fn test_probe_true_immediately_after_generate_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let material = CertificateMaterial::generate().unwrap();
        material.write(&paths).unwrap();

        assert!(probe(&paths));
    }

    #[test]
    fn test_probe_false_when_files_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!probe(&paths_in(dir.path())));
    }

    #[test]
    fn test_probe_false_when_certificate_is_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.cert, "not a certificate").unwrap();
        std::fs::write(&paths.key, "not a key").unwrap();

        assert!(!probe(&paths));
    }

    #[test]
    fn test_probe_false_when_certificate_is_expired() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let now = OffsetDateTime::now_utc();
        let expired =
            CertificateMaterial::generate_window(now - Duration::days(3), now - Duration::days(1))
                .unwrap();
        expired.write(&paths).unwrap();

        assert!(!probe(&paths));
    }

    #[test]
    fn test_partial_set_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let material = CertificateMaterial::generate().unwrap();
        material.write(&paths).unwrap();
        std::fs::remove_file(&paths.key).unwrap();

        assert!(!probe(&paths));
    }

    #[test]
    fn test_rollback_removes_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let material = CertificateMaterial::generate().unwrap();
        material.write(&paths).unwrap();
        remove_material(&paths);

        assert!(!paths.root.exists());
        assert!(!paths.cert.exists());
        assert!(!paths.key.exists());
    }

    #[test]
    fn test_ensure_material_regenerates_expired_or_absent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let (_, generated) = ensure_material(&paths).unwrap();
        assert!(generated);

        let (_, generated_again) = ensure_material(&paths).unwrap();
        assert!(!generated_again);
    }

    #[test]
    fn test_load_round_trips_written_material() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let material = CertificateMaterial::generate().unwrap();
        material.write(&paths).unwrap();

        let loaded = CertificateMaterial::load(&paths).unwrap();
        assert_eq!(loaded.root, material.root);
        assert_eq!(loaded.cert, material.cert);
        assert_eq!(loaded.key, material.key);
    }
}
