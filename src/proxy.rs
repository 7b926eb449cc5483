//! Contract with the secure token-proxy server.
//!
//! The proxy itself is an external component; this module pins down the
//! interface the trust layer consumes: the lifecycle/request event stream,
//! the shape of approval requests, the configuration handed to the server at
//! construction, and the remote-identity storage the session directory
//! projects from.
//!
//! Approval requests carry a one-shot response channel instead of mutable
//! result fields: the consent coordinator is the sole writer, and dropping
//! the sender (an abnormal close) is observable as a rejection on the proxy
//! side rather than a request that hangs forever.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::types::TrustError;

/// Default depth of the server event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A hardware token observed by the proxy
#[derive(Debug, Clone)]
pub struct Card {
    /// Reader the token was seen in
    pub reader: String,
    /// Answer-to-reset bytes identifying the token model
    pub atr: Vec<u8>,
}

impl Card {
    /// Uppercase hex rendering of the token identifier
    pub fn atr_hex(&self) -> String {
        hex::encode_upper(&self.atr)
    }
}

/// An approval request raised by the proxy.
///
/// An unrecognized request type is a protocol violation fatal to that
/// request (not to the process); it surfaces as [`NotifyRequest::Unknown`].
#[derive(Debug)]
pub enum NotifyRequest {
    /// A remote browser session asks to be paired with a local session key
    PairingApproval {
        /// Origin of the requesting remote party
        origin: String,
        /// Resolved with the user's accept/deny choice; deny when closed
        /// without an explicit choice
        responder: oneshot::Sender<bool>,
    },

    /// A provider needs a PIN to unlock a token
    PinEntry {
        /// Origin or provider description shown to the user
        origin: String,
        /// Resolved with the entered PIN, or rejected; never resolved with
        /// an empty value
        responder: oneshot::Sender<Result<String, TrustError>>,
    },

    /// Request type this version does not understand
    Unknown {
        /// The unrecognized type tag
        kind: String,
    },
}

/// Lifecycle and request events emitted by the proxy server
#[derive(Debug)]
pub enum ServerEvent {
    /// The server accepted its listen address
    Listening(String),
    /// Informational message
    Info(String),
    /// Server-side error (logged, not user-facing)
    Error(String),
    /// Token-level error the user should see as a non-blocking advisory
    TokenError(String),
    /// A token absent from the catalog was detected
    TokenNew(Card),
    /// An approval request that must be resolved by the consent coordinator
    Notify(NotifyRequest),
    /// The server shut down
    Close(String),
}

/// Create the event channel connecting the proxy to the consent coordinator.
///
/// The proxy holds the sender; the coordinator consumes the receiver for the
/// remainder of the process lifetime.
pub fn event_channel() -> (mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Everything the proxy server needs at construction time
#[derive(Debug, Clone)]
pub struct SecureServerConfig {
    /// Address to listen on
    pub listen: String,
    /// Certificate authority root (PEM file)
    pub ca_cert: PathBuf,
    /// Server leaf certificate (PEM file)
    pub cert: PathBuf,
    /// Server private key (PEM file)
    pub key: PathBuf,
    /// Local copy of the token catalog
    pub cards: PathBuf,
    /// Provider definitions passed through from user configuration
    pub providers: Vec<serde_json::Value>,
    /// Whether catalog synchronization was suppressed
    pub disable_card_update: bool,
}

/// A remote identity recorded by the proxy, keyed externally by session id
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
    /// Origin the session was established from
    pub origin: String,
    /// Raw user-agent string of the remote browser
    pub user_agent: String,
    /// When the pairing was created
    pub created_at: DateTime<Utc>,
}

/// Remote-identity storage exposed by the proxy to the session directory
pub trait IdentityStore: Send + Sync {
    /// Snapshot of all remote identities, keyed by session id
    fn remote_identities(&self) -> Vec<(String, RemoteIdentity)>;

    /// Remove every identity whose origin equals `origin`, returning how
    /// many were removed
    fn remove_origin(&self, origin: &str) -> usize;
}

/// In-memory identity store.
///
/// The shape the proxy's storage presents; also what the tests and the
/// standalone binary run against.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    inner: RwLock<HashMap<String, RemoteIdentity>>,
}

impl InMemoryIdentityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an identity under a session id
    pub fn insert(&self, session_id: impl Into<String>, identity: RemoteIdentity) {
        self.inner
            .write()
            .expect("identity store lock poisoned")
            .insert(session_id.into(), identity);
    }

    /// Number of stored identities
    pub fn len(&self) -> usize {
        self.inner.read().expect("identity store lock poisoned").len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn remote_identities(&self) -> Vec<(String, RemoteIdentity)> {
        self.inner
            .read()
            .expect("identity store lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn remove_origin(&self, origin: &str) -> usize {
        let mut inner = self.inner.write().expect("identity store lock poisoned");
        let before = inner.len();
        inner.retain(|_, identity| identity.origin != origin);
        before - inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(origin: &str) -> RemoteIdentity {
        RemoteIdentity {
            origin: origin.to_string(),
            user_agent: "Mozilla/5.0 Chrome/120.0".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_atr_hex_is_uppercase() {
        let card = Card {
            reader: "ACS ACR122".into(),
            atr: vec![0x3b, 0xfa, 0x18, 0x00],
        };
        assert_eq!(card.atr_hex(), "3BFA1800");
    }

    #[test]
    fn test_remove_origin_removes_every_matching_identity() {
        let store = InMemoryIdentityStore::new();
        store.insert("s1", identity("https://a.example"));
        store.insert("s2", identity("https://a.example"));
        store.insert("s3", identity("https://b.example"));

        assert_eq!(store.remove_origin("https://a.example"), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove_origin("https://a.example"), 0);
    }
}
