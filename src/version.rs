//! Lenient semantic-version handling for catalog and update comparison.
//!
//! Remote documents are not trusted to carry well-formed versions. A missing
//! or unparsable version never aborts a comparison: it degrades to `0.0.0`
//! (the oldest possible version) and is logged so a chronically version-less
//! source stays diagnosable.

use semver::Version;
use tracing::warn;

/// The version assigned to documents that carry none
pub fn zero() -> Version {
    Version::new(0, 0, 0)
}

/// Parse a version string, defaulting to `0.0.0` on absence or parse failure.
///
/// `context` names the document being parsed, for the log line.
pub fn parse_or_zero(version: Option<&str>, context: &str) -> Version {
    match version {
        None => {
            warn!("{} carries no version, treating as 0.0.0", context);
            zero()
        }
        Some(raw) => match Version::parse(raw.trim()) {
            Ok(v) => v,
            Err(e) => {
                warn!("{} has unparsable version '{}' ({}), treating as 0.0.0", context, raw, e);
                zero()
            }
        },
    }
}

/// Strictly-greater comparison used by the catalog replace decision
pub fn is_newer(remote: &Version, local: &Version) -> bool {
    remote > local
}
