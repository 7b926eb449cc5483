//! Trustpoint - trust bootstrap and consent mediation for the local
//! cryptographic-token proxy.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trustpoint::{
    catalog::CatalogSynchronizer,
    config::{Args, Configure},
    consent::{
        surface, ConsentCoordinator, Prompter, SupportConfig, SurfaceKind, SurfaceRegistry,
    },
    envelope::EnvelopeVerifier,
    ipc::DirectoryService,
    pki::{self, CertPaths},
    proxy::{self, InMemoryIdentityStore, SecureServerConfig},
    update::{self, UpdateGate, Verdict},
    version,
};

/// Shown before the trust-store installation triggers an elevation prompt
const INSTALL_FOREWARNING: &str = "We need to make the Trustpoint certificate trusted. \
                                   When we do this you will be asked for your administrator password.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // User configuration decides file logging, so read it first
    let configure = Configure::read(&args.config_file());

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    let file_layer = if configure.logging {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(args.log_file())
        {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            ),
            Err(e) => {
                eprintln!("Cannot open log file {}: {}", args.log_file().display(), e);
                None
            }
        }
    } else {
        None
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("trustpoint={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Trustpoint - Local Trust Bootstrap");
    info!("======================================");
    info!("Data directory: {}", args.data_dir.display());
    info!("Listen: {}", args.listen);
    info!("Catalog: {}", args.catalog_link);
    info!(
        "Catalog sync: {}",
        if configure.disable_card_update { "disabled" } else { "enabled" }
    );
    info!(
        "Update gate: {}",
        if args.check_update { "enabled" } else { "disabled" }
    );
    info!("======================================");

    let surfaces = SurfaceRegistry::new();
    let prompter: Arc<dyn Prompter> = Arc::new(StdioPrompter);

    // Certificate bootstrap: a trusted transport must exist before the
    // secure server is constructed. A fresh set is not usable until its
    // root is installed into the OS trust store, which prompts for an
    // administrator credential, so the user is forewarned first.
    let cert_paths = CertPaths {
        root: args.ca_cert_file(),
        cert: args.cert_file(),
        key: args.key_file(),
    };
    let generated = match pki::ensure_material(&cert_paths) {
        Ok((_material, generated)) => generated,
        Err(e) => {
            error!("Certificate setup failed: {}", e);
            surface::acknowledge(
                &surfaces,
                &prompter,
                SurfaceKind::Error,
                &e.to_string(),
            )
            .await;
            std::process::exit(1);
        }
    };
    if generated {
        surface::acknowledge(
            &surfaces,
            &prompter,
            SurfaceKind::Warning,
            INSTALL_FOREWARNING,
        )
        .await;

        match pki::install_trusted(&cert_paths.root).await {
            Ok(()) => info!("Root certificate installed into the trust store"),
            Err(e) => {
                // An untrusted set must not be left behind, whether the
                // install failed or the user cancelled the elevation prompt.
                pki::remove_material(&cert_paths);
                match &e {
                    pki::InstallError::Cancelled => {
                        info!("Trust-store installation cancelled by the user")
                    }
                    _ => error!("Trust-store installation failed: {}", e),
                }
                surface::acknowledge(
                    &surfaces,
                    &prompter,
                    SurfaceKind::Error,
                    &e.to_string(),
                )
                .await;
                std::process::exit(1);
            }
        }
    }

    // Catalog synchronization; every failure inside is recoverable. The
    // signer key is a deployment input: without one, no remote document can
    // be trusted, so the step is skipped and catalog support degrades.
    if configure.disable_card_update {
        info!("Catalog synchronization is disabled by configuration");
    } else if let Some(ref hex_key) = args.catalog_signer {
        match EnvelopeVerifier::from_hex(hex_key) {
            Ok(verifier) => match CatalogSynchronizer::new(
                args.catalog_link.clone(),
                args.catalog_file(),
                args.bundled_catalog.clone(),
                verifier,
                Duration::from_secs(args.fetch_timeout_secs),
            ) {
                Ok(sync) => sync.synchronize().await,
                Err(e) => error!("Catalog synchronizer unavailable: {}", e),
            },
            Err(e) => error!("Catalog signer key is unusable, skipping synchronization: {}", e),
        }
    } else {
        error!("No catalog signer key configured, skipping synchronization");
    }

    // Update gate: blocks startup on its verdict, then re-runs on a timer
    if args.check_update {
        let current = version::parse_or_zero(Some(env!("CARGO_PKG_VERSION")), "running version");
        let gate = match UpdateGate::new(
            args.update_info_link.clone(),
            args.download_link.clone(),
            current,
            Arc::clone(&surfaces),
            Arc::clone(&prompter),
            Duration::from_secs(args.fetch_timeout_secs),
        ) {
            Ok(gate) => gate,
            Err(e) => {
                error!("Update gate unavailable: {}", e);
                std::process::exit(1);
            }
        };

        match gate.check().await {
            Ok(Verdict::Blocked) => {
                info!("Close application");
                std::process::exit(1);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Update: {}", e);
                surface::acknowledge(
                    &surfaces,
                    &prompter,
                    SurfaceKind::Error,
                    &e.to_string(),
                )
                .await;
                std::process::exit(1);
            }
        }
        update::spawn_periodic(gate, Duration::from_secs(args.check_update_interval_secs));
    }

    // Construction material for the secure server (an external component
    // linked in at its interface) and the channels it talks through
    let server_config = SecureServerConfig {
        listen: args.listen.clone(),
        ca_cert: cert_paths.root.clone(),
        cert: cert_paths.cert.clone(),
        key: cert_paths.key.clone(),
        cards: args.catalog_file(),
        providers: configure.providers.clone(),
        disable_card_update: configure.disable_card_update,
    };
    info!("Server: configured for {}", server_config.listen);

    let (event_tx, event_rx) = proxy::event_channel();

    // Session directory, served to the local UI layer over its command channel
    let store = Arc::new(InMemoryIdentityStore::new());
    let directory =
        DirectoryService::new(store, Arc::clone(&surfaces), Arc::clone(&prompter));
    let (directory_tx, _directory_handle) = directory.spawn();

    // Consent coordinator attaches before any client traffic is expected
    let coordinator = ConsentCoordinator::new(
        surfaces,
        prompter,
        SupportConfig {
            link: args.support_link.clone(),
            template: SupportConfig::default_template(),
        },
    );
    let coordinator_handle = tokio::spawn(coordinator.run(event_rx));

    info!("Trustpoint is running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Close: interrupted");

    // Closing the event channel lets the coordinator drain and finish
    drop(event_tx);
    drop(directory_tx);
    if let Err(e) = coordinator_handle.await {
        warn!("Consent coordinator ended abnormally: {}", e);
    }

    Ok(())
}

/// Terminal-backed approval surfaces.
///
/// Stands in for a windowed presentation layer: each surface is a prompt on
/// the controlling terminal. End-of-input counts as closing the surface
/// without a choice, so the deny/empty defaults apply.
struct StdioPrompter;

impl StdioPrompter {
    /// Read one line from stdin off the async runtime
    async fn read_line() -> Option<String> {
        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) => None,
                Ok(_) => Some(line.trim().to_string()),
                Err(_) => None,
            }
        })
        .await
        .ok()
        .flatten()
    }
}

#[async_trait]
impl Prompter for StdioPrompter {
    async fn acknowledge(&self, kind: SurfaceKind, text: &str) {
        println!("[{}] {}", kind.label(), text);
        println!("Press Enter to continue.");
        let _ = Self::read_line().await;
    }

    async fn confirm(&self, kind: SurfaceKind, text: &str) -> bool {
        println!("[{}] {}", kind.label(), text);
        println!("Type 'y' to accept, anything else to deny.");
        matches!(Self::read_line().await.as_deref(), Some("y") | Some("Y"))
    }

    async fn collect_secret(&self, text: &str) -> Option<String> {
        println!("[{}] {}", SurfaceKind::Credential.label(), text);
        Self::read_line().await.filter(|line| !line.is_empty())
    }

    fn open_external(&self, link: &str) {
        info!("Opening {}", link);
        #[cfg(target_os = "macos")]
        let opener = "open";
        #[cfg(target_os = "windows")]
        let opener = "explorer";
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let opener = "xdg-open";

        if let Err(e) = std::process::Command::new(opener).arg(link).spawn() {
            warn!("Cannot open {}: {}", link, e);
        }
    }
}
