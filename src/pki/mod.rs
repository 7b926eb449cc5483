//! Certificate authority lifecycle.
//!
//! Generates a self-signed root plus a leaf certificate/key bound to the
//! local service, probes existing material for validity, and drives the
//! OS-specific trust-store installation with total rollback on failure.
//!
//! The three artifacts (root, cert, key) are treated as one unit: either all
//! of them exist on disk or none do. A partial set is "absent" and triggers
//! regeneration.

pub mod authority;
pub mod install;

pub use authority::{ensure_material, probe, remove_material, CertPaths, CertificateMaterial};
pub use install::{install_trusted, InstallError};
