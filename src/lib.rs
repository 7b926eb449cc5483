//! Trustpoint: the trust-bootstrap and consent-mediation layer for a local
//! cryptographic-token proxy.
//!
//! The library establishes a locally-trusted TLS transport (a self-signed
//! authority the OS trust store accepts), keeps a signed token catalog in
//! sync with its remote source of truth, gates startup on release metadata,
//! and mediates every remote request for hardware or session keys through
//! human approval.
//!
//! Module map:
//! - [`pki`]: certificate-authority lifecycle and OS trust-store install
//! - [`envelope`]: compact signed-document verification
//! - [`catalog`]: signed-catalog synchronization
//! - [`update`]: startup/periodic update gate
//! - [`consent`]: approval surfaces and the event-driven consent coordinator
//! - [`proxy`]: the interface contract with the external secure server
//! - [`directory`] / [`ipc`]: session-directory projection and its
//!   command channel
//! - [`config`] / [`types`] / [`version`]: arguments, persisted settings,
//!   errors, version comparison

pub mod catalog;
pub mod config;
pub mod consent;
pub mod directory;
pub mod envelope;
pub mod ipc;
pub mod pki;
pub mod proxy;
pub mod types;
pub mod update;
pub mod version;

pub use config::{Args, Configure};
pub use types::{Result, TrustError};
