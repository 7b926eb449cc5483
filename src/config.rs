//! Configuration for trustpoint.
//!
//! Two layers, matching how the service is deployed:
//! - [`Args`]: CLI arguments and environment variables (paths, remote links,
//!   listen address, timers).
//! - [`Configure`]: the user-editable JSON file under the data directory
//!   (`logging`, `disableCardUpdate`, `providers`). A bad or missing file is
//!   recovered with defaults and logged, never raised.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Trustpoint - trust bootstrap and consent mediation for the local token proxy
#[derive(Parser, Debug, Clone)]
#[command(name = "trustpoint")]
#[command(about = "Trust bootstrap and consent mediation for the local cryptographic-token proxy")]
pub struct Args {
    /// Data directory holding certificate material, catalog and configuration
    #[arg(long, env = "TRUSTPOINT_DIR", default_value_os_t = default_data_dir())]
    pub data_dir: PathBuf,

    /// Address the secure server listens on
    #[arg(long, env = "LISTEN", default_value = "127.0.0.1:31337")]
    pub listen: String,

    /// Location of the remote signed catalog document
    #[arg(
        long,
        env = "CATALOG_LINK",
        default_value = "https://trustpoint.example/catalog/card.jws"
    )]
    pub catalog_link: String,

    /// Location of the remote update metadata document
    #[arg(
        long,
        env = "UPDATE_INFO_LINK",
        default_value = "https://trustpoint.example/release/update.json"
    )]
    pub update_info_link: String,

    /// Page opened when the user accepts an optional upgrade
    #[arg(
        long,
        env = "DOWNLOAD_LINK",
        default_value = "https://trustpoint.example/download"
    )]
    pub download_link: String,

    /// Issue tracker used by the unsupported-token support-request flow
    #[arg(
        long,
        env = "SUPPORT_LINK",
        default_value = "https://trustpoint.example/catalog/issues/new"
    )]
    pub support_link: String,

    /// Hex-encoded Ed25519 public key catalog envelopes must be signed with.
    /// Catalog synchronization is skipped when no key is configured.
    #[arg(long, env = "CATALOG_SIGNER")]
    pub catalog_signer: Option<String>,

    /// Bundled default catalog shipped with the application (optional)
    #[arg(long, env = "BUNDLED_CATALOG")]
    pub bundled_catalog: Option<PathBuf>,

    /// Enable the update gate
    #[arg(long, env = "CHECK_UPDATE", default_value = "true")]
    pub check_update: bool,

    /// Interval between background update checks, in seconds
    #[arg(long, env = "CHECK_UPDATE_INTERVAL_SECS", default_value = "14400")]
    pub check_update_interval_secs: u64,

    /// Timeout for remote fetches (catalog, update metadata), in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "30")]
    pub fetch_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Path of the user configuration file
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Path of the log file used when file logging is enabled
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("trustpoint.log")
    }

    /// Path of the certificate authority root
    pub fn ca_cert_file(&self) -> PathBuf {
        self.data_dir.join("ca.pem")
    }

    /// Path of the server leaf certificate
    pub fn cert_file(&self) -> PathBuf {
        self.data_dir.join("cert.pem")
    }

    /// Path of the server private key
    pub fn key_file(&self) -> PathBuf {
        self.data_dir.join("key.pem")
    }

    /// Path of the local catalog copy
    pub fn catalog_file(&self) -> PathBuf {
        self.data_dir.join("card.json")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.check_update_interval_secs == 0 {
            return Err("CHECK_UPDATE_INTERVAL_SECS must be greater than zero".to_string());
        }
        if self.fetch_timeout_secs == 0 {
            return Err("FETCH_TIMEOUT_SECS must be greater than zero".to_string());
        }
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("LISTEN '{}' is not a socket address", self.listen));
        }
        Ok(())
    }
}

/// Default data directory: `~/.trustpoint`
fn default_data_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".trustpoint")
}

/// User-editable configuration persisted as JSON under the data directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configure {
    /// Whether log output is additionally written to the log file
    pub logging: bool,

    /// Suppress the catalog synchronization step entirely
    pub disable_card_update: bool,

    /// Provider definitions passed through to the secure server untouched
    pub providers: Vec<serde_json::Value>,
}

impl Configure {
    /// Read the configuration file, recovering with defaults on any failure.
    ///
    /// A missing file is normal on first run; a present-but-broken file is
    /// logged with its parse error and replaced by defaults in memory (the
    /// file itself is left alone).
    pub fn read(path: &Path) -> Self {
        if !path.exists() {
            info!("Configuration file {} not found, using defaults", path.display());
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(configure) => configure,
                Err(e) => {
                    error!("Cannot parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Cannot read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the configuration file, creating the data directory if needed
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, raw)
    }
}
