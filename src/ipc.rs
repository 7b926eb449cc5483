//! Directory-management commands over the inter-process channel.
//!
//! The local UI layer manages paired sessions through two request/response
//! commands, `list-sessions` and `remove-session`. Every response echoes the
//! correlation id of the command that produced it, so the UI side can match
//! replies to in-flight requests. Removal is gated behind a confirmation
//! surface before any state is mutated.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::consent::surface::{self, Prompter, SurfaceKind, SurfaceRegistry};
use crate::directory::{self, SessionGroup};
use crate::proxy::IdentityStore;

/// Default depth of the command channel
pub const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// A directory-management command from the local UI layer
#[derive(Debug)]
pub enum DirectoryCommand {
    /// Project the current directory into presentable origin groups
    ListSessions {
        /// Correlation id echoed in the reply
        correlation: Uuid,
        /// Where the projection is delivered
        reply: oneshot::Sender<ListSessionsReply>,
    },

    /// Remove every session paired from `origin`, after confirmation
    RemoveSession {
        /// Correlation id echoed in the reply
        correlation: Uuid,
        /// Origin whose sessions are revoked
        origin: String,
        /// Where the removal outcome is delivered
        reply: oneshot::Sender<RemoveSessionReply>,
    },
}

/// Reply to [`DirectoryCommand::ListSessions`]
#[derive(Debug)]
pub struct ListSessionsReply {
    /// Correlation id of the originating command
    pub correlation: Uuid,
    /// Directory projection, grouped by origin
    pub sessions: Vec<SessionGroup>,
}

/// Reply to [`DirectoryCommand::RemoveSession`]
#[derive(Debug)]
pub struct RemoveSessionReply {
    /// Correlation id of the originating command
    pub correlation: Uuid,
    /// Whether the user confirmed and the removal ran
    pub removed: bool,
}

/// Serves directory commands against the proxy's identity store
pub struct DirectoryService {
    store: Arc<dyn IdentityStore>,
    surfaces: Arc<SurfaceRegistry>,
    prompter: Arc<dyn Prompter>,
}

impl DirectoryService {
    /// Create a service over `store`
    pub fn new(
        store: Arc<dyn IdentityStore>,
        surfaces: Arc<SurfaceRegistry>,
        prompter: Arc<dyn Prompter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            surfaces,
            prompter,
        })
    }

    /// Start the command loop, returning the sender the UI layer submits
    /// commands through
    pub fn spawn(self: Arc<Self>) -> (mpsc::Sender<DirectoryCommand>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    DirectoryCommand::ListSessions { correlation, reply } => {
                        let identities: Vec<_> = self
                            .store
                            .remote_identities()
                            .into_iter()
                            .map(|(_, identity)| identity)
                            .collect();
                        let sessions = directory::project(&identities);
                        if reply
                            .send(ListSessionsReply {
                                correlation,
                                sessions,
                            })
                            .is_err()
                        {
                            warn!("list-sessions requester went away before reply");
                        }
                    }
                    DirectoryCommand::RemoveSession {
                        correlation,
                        origin,
                        reply,
                    } => {
                        let this = Arc::clone(&self);
                        // Confirmation blocks on the user; run it off the
                        // command loop so listing stays responsive.
                        tokio::spawn(async move {
                            let removed = this.remove_session(&origin).await;
                            if reply
                                .send(RemoveSessionReply {
                                    correlation,
                                    removed,
                                })
                                .is_err()
                            {
                                warn!("remove-session requester went away before reply");
                            }
                        });
                    }
                }
            }
            info!("Directory command channel closed");
        });
        (tx, handle)
    }

    /// Confirm with the user, then revoke every identity under `origin`
    async fn remove_session(&self, origin: &str) -> bool {
        let text = format!("Do you want to remove {origin} from the trusted list?");
        let confirmed =
            surface::ask(&self.surfaces, &self.prompter, SurfaceKind::Question, &text).await;
        if !confirmed {
            info!("Removal of {} declined", origin);
            return false;
        }

        let removed = self.store.remove_origin(origin);
        info!("Removed {} session(s) for {}", removed, origin);
        true
    }
}
