//! The update gate.
//!
//! Fetches remote release metadata, compares it with the running version and
//! decides among no-op, optional-upgrade prompt and mandatory block. The
//! metadata document is a lower trust tier than the catalog: it is fetched
//! over HTTPS but not signature-verified.
//!
//! The gate runs once at startup (blocking startup on its verdict) and then
//! on a fixed interval. Whatever the user answers on the optional prompt,
//! a running version below the remote-declared minimum blocks the run.

use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::consent::surface::{self, Prompter, SurfaceKind, SurfaceRegistry};
use crate::types::{Result, TrustError};
use crate::version;

/// Message shown when the running version is below the mandated minimum
const BLOCKED_MESSAGE: &str =
    "The application cannot be started until the new update has been applied.";

/// Remote release metadata
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateInfo {
    /// Latest released version
    pub version: String,

    /// Lowest version permitted to keep running, if the release declares one
    #[serde(default)]
    pub min: Option<String>,
}

/// Outcome of one gate evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The running version is current; nothing was shown
    UpToDate,
    /// A newer version exists and was offered; the run may continue
    Continue,
    /// The running version is below the mandated minimum; the run must end
    Blocked,
}

/// Whether `info` forbids `current` from running
pub fn below_minimum(current: &Version, info: &UpdateInfo) -> bool {
    match info.min.as_deref() {
        Some(min) => *current < version::parse_or_zero(Some(min), "update minimum"),
        None => false,
    }
}

/// Decides whether the running version may start and keep running
pub struct UpdateGate {
    client: reqwest::Client,
    link: String,
    download_link: String,
    current: Version,
    surfaces: Arc<SurfaceRegistry>,
    prompter: Arc<dyn Prompter>,
}

impl UpdateGate {
    /// Create a gate with a bounded fetch timeout
    pub fn new(
        link: String,
        download_link: String,
        current: Version,
        surfaces: Arc<SurfaceRegistry>,
        prompter: Arc<dyn Prompter>,
        fetch_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| TrustError::Network(format!("cannot build HTTP client: {e}")))?;

        Ok(Arc::new(Self {
            client,
            link,
            download_link,
            current,
            surfaces,
            prompter,
        }))
    }

    /// Run one gate evaluation.
    ///
    /// A transport-level fetch failure is recoverable and reported as
    /// [`Verdict::UpToDate`]. Metadata that arrives but cannot be parsed is
    /// the critical failure: the update channel itself is broken and the
    /// minimum-version rule cannot be evaluated, so the error propagates and
    /// the caller must exit after presenting it.
    pub async fn check(&self) -> Result<Verdict> {
        info!("Update: check for new update");

        let info = match self.fetch_info().await {
            Ok(info) => info,
            Err(TrustError::Network(message)) => {
                error!("Update: check failed ({}), continuing", message);
                return Ok(Verdict::UpToDate);
            }
            Err(e) => return Err(e),
        };

        self.evaluate(&info).await
    }

    /// Fetch the remote metadata document
    async fn fetch_info(&self) -> Result<UpdateInfo> {
        let response = self
            .client
            .get(&self.link)
            .send()
            .await
            .map_err(|e| TrustError::Network(format!("GET {}: {e}", self.link)))?
            .error_for_status()
            .map_err(|e| TrustError::Network(format!("GET {}: {e}", self.link)))?;

        let raw = response
            .text()
            .await
            .map_err(|e| TrustError::Network(format!("reading {}: {e}", self.link)))?;

        serde_json::from_str(&raw).map_err(|e| {
            TrustError::CriticalUpdate(format!("update metadata from {} is invalid: {e}", self.link))
        })
    }

    /// Evaluate fetched metadata against the running version
    async fn evaluate(&self, info: &UpdateInfo) -> Result<Verdict> {
        let remote = version::parse_or_zero(Some(&info.version), "update metadata");
        if remote <= self.current {
            info!("Update: new version wasn't found");
            return Ok(Verdict::UpToDate);
        }

        info!("Update: new version {} was found", remote);
        let text = format!(
            "A new update is available. Do you want to download version {} now?",
            info.version
        );
        let accepted =
            surface::ask(&self.surfaces, &self.prompter, SurfaceKind::Question, &text).await;
        if accepted {
            info!("User agreed to download new version {}", info.version);
            self.prompter.open_external(&self.download_link);
        } else {
            info!("User refused to download new version {}", info.version);
        }

        // The minimum-version rule applies regardless of the choice above.
        if below_minimum(&self.current, info) {
            info!(
                "Update {} is critical, running version {} is below the minimum",
                info.version, self.current
            );
            surface::acknowledge(
                &self.surfaces,
                &self.prompter,
                SurfaceKind::Error,
                BLOCKED_MESSAGE,
            )
            .await;
            return Ok(Verdict::Blocked);
        }

        Ok(Verdict::Continue)
    }
}

/// Re-run the gate on a fixed interval for the remainder of the process.
///
/// The periodic check runs concurrently with the serving process; a
/// `Blocked` verdict (or a critical failure) still ends the run, after the
/// error surface has been shown.
pub fn spawn_periodic(gate: Arc<UpdateGate>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick fires immediately; startup already checked.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match gate.check().await {
                Ok(Verdict::Blocked) => {
                    info!("Close application");
                    std::process::exit(1);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Update: {}", e);
                    surface::acknowledge(
                        &gate.surfaces,
                        &gate.prompter,
                        SurfaceKind::Error,
                        &e.to_string(),
                    )
                    .await;
                    std::process::exit(1);
                }
            }
        }
    })
}
