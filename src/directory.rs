//! Session directory projection.
//!
//! Transforms the proxy's remote-identity records into a de-duplicated,
//! human-presentable list grouped by origin: browsers are classified from
//! the raw user-agent with ordered pattern precedence, identities are sorted
//! by `(origin, browser)`, and each origin group keeps its earliest creation
//! time and distinct browser set.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::proxy::RemoteIdentity;

/// Browser family derived from a user-agent string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Edge,
    Ie,
    Chrome,
    Safari,
    Firefox,
    Other,
}

impl Browser {
    /// Lowercase label, also the sort key within an origin
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Edge => "edge",
            Self::Ie => "ie",
            Self::Chrome => "chrome",
            Self::Safari => "safari",
            Self::Firefox => "firefox",
            Self::Other => "other",
        }
    }

    /// Classify a user-agent string.
    ///
    /// Patterns are checked in a fixed order and the first match wins:
    /// Edge identifies itself as Chrome and Safari too, and Chrome as
    /// Safari, so the more specific marker must be tested first.
    pub fn classify(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        if ua.contains("edge") {
            Self::Edge
        } else if ua.contains("msie") || ua.contains("trident") {
            Self::Ie
        } else if ua.contains("chrome") {
            Self::Chrome
        } else if ua.contains("safari") {
            Self::Safari
        } else if ua.contains("firefox") {
            Self::Firefox
        } else {
            Self::Other
        }
    }
}

/// One presentable directory entry: an origin with every browser it was
/// paired from and the earliest pairing time
#[derive(Debug, Clone, Serialize)]
pub struct SessionGroup {
    /// Origin the sessions were established from
    pub origin: String,
    /// Earliest `created_at` across the group
    pub created: DateTime<Utc>,
    /// Distinct browsers, in `(origin, browser)` sort order
    pub browsers: Vec<Browser>,
}

/// Project identities into origin groups.
///
/// Identities are classified, sorted by `(origin, browser)` ascending, then
/// folded into groups of equal origin preserving that order; each group
/// takes the earliest creation time and the distinct browser set.
pub fn project(identities: &[RemoteIdentity]) -> Vec<SessionGroup> {
    let mut classified: Vec<(&str, Browser, DateTime<Utc>)> = identities
        .iter()
        .map(|identity| {
            (
                identity.origin.as_str(),
                Browser::classify(&identity.user_agent),
                identity.created_at,
            )
        })
        .collect();
    classified.sort_by(|a, b| (a.0, a.1.as_str()).cmp(&(b.0, b.1.as_str())));

    let mut groups: Vec<SessionGroup> = Vec::new();
    for (origin, browser, created) in classified {
        match groups.last_mut() {
            Some(group) if group.origin == origin => {
                if created < group.created {
                    group.created = created;
                }
                if !group.browsers.contains(&browser) {
                    group.browsers.push(browser);
                }
            }
            _ => groups.push(SessionGroup {
                origin: origin.to_string(),
                created,
                browsers: vec![browser],
            }),
        }
    }
    groups
}
