//! OS trust-store registration for the generated root certificate.
//!
//! Registration requires elevated privilege and prompts the user for an
//! administrator credential. A prompt the user dismisses is reported as
//! [`InstallError::Cancelled`], distinct from a registration that actually
//! failed — callers roll back the certificate set and abort the run either
//! way, but the message shown to the user differs.

use std::path::Path;
use std::process::Output;

use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Error types for trust-store installation
#[derive(Debug, Error)]
pub enum InstallError {
    /// The user dismissed the privilege prompt
    #[error("the user cancelled the privilege prompt")]
    Cancelled,

    /// Registration ran and failed
    #[error("{0}")]
    Failed(String),

    /// No registration procedure exists for this platform
    #[error("no trust-store registration procedure for platform '{0}'")]
    Unsupported(String),
}

/// Register the root certificate with the OS trust store.
///
/// Blocks until the platform tool finishes; the privilege prompt is shown by
/// the OS, not by us.
pub async fn install_trusted(root_cert: &Path) -> Result<(), InstallError> {
    info!("Registering {} with the OS trust store", root_cert.display());
    let root_cert = root_cert
        .to_str()
        .ok_or_else(|| InstallError::Failed("certificate path is not valid UTF-8".into()))?;

    #[cfg(target_os = "macos")]
    {
        install_macos(root_cert).await
    }
    #[cfg(target_os = "linux")]
    {
        install_linux(root_cert).await
    }
    #[cfg(target_os = "windows")]
    {
        install_windows(root_cert).await
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = root_cert;
        Err(InstallError::Unsupported(std::env::consts::OS.to_string()))
    }
}

#[cfg(target_os = "macos")]
async fn install_macos(root_cert: &str) -> Result<(), InstallError> {
    // osascript raises the system authorization dialog; `security` itself
    // would require an already-elevated shell.
    let script = format!(
        "do shell script \"security add-trusted-cert -d -r trustRoot \
         -k /Library/Keychains/System.keychain '{root_cert}'\" \
         with administrator privileges"
    );
    let output = run("osascript", &["-e", &script]).await?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    // AppleScript reports a dismissed authorization dialog as error -128.
    if stderr.contains("-128") || stderr.to_lowercase().contains("user canceled") {
        return Err(InstallError::Cancelled);
    }
    Err(InstallError::Failed(command_failure("osascript", &output)))
}

#[cfg(target_os = "linux")]
async fn install_linux(root_cert: &str) -> Result<(), InstallError> {
    let script = format!(
        "cp '{root_cert}' /usr/local/share/ca-certificates/trustpoint-root.crt \
         && update-ca-certificates"
    );
    let output = run("pkexec", &["sh", "-c", &script]).await?;
    if output.status.success() {
        return Ok(());
    }

    // pkexec exits 126 when the authentication dialog is dismissed.
    if output.status.code() == Some(126) {
        return Err(InstallError::Cancelled);
    }
    Err(InstallError::Failed(command_failure("pkexec", &output)))
}

#[cfg(target_os = "windows")]
async fn install_windows(root_cert: &str) -> Result<(), InstallError> {
    let output = run("certutil", &["-addstore", "-f", "ROOT", root_cert]).await?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    if stderr.contains("cancel") {
        return Err(InstallError::Cancelled);
    }
    Err(InstallError::Failed(command_failure("certutil", &output)))
}

#[allow(dead_code)]
async fn run(program: &str, args: &[&str]) -> Result<Output, InstallError> {
    Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| InstallError::Failed(format!("cannot run {program}: {e}")))
}

#[allow(dead_code)]
fn command_failure(program: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!(
        "{program} exited with {}: {}",
        output.status,
        stderr.trim()
    )
}
