//! Approval surfaces and the per-kind singleton registry.
//!
//! Rendering is out of scope here; a [`Prompter`] implementation owns the
//! actual presentation (windows, terminal, test script). This module owns
//! the identity rule: at most one live surface per [`SurfaceKind`]. A second
//! concurrent request of the same kind refocuses the open surface and shares
//! its outcome instead of opening a duplicate; requests of different kinds
//! run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

/// The distinct approval-surface types.
///
/// Singleton-ness is per kind: an open `Question` does not block a
/// `Credential`, but a second `Question` reuses the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Informational notice
    Info,
    /// Non-blocking advisory
    Warning,
    /// Error the user must acknowledge
    Error,
    /// Yes/no question
    Question,
    /// Session-pairing approval
    Pairing,
    /// Masked credential entry
    Credential,
}

impl SurfaceKind {
    /// Human-readable label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Question => "question",
            Self::Pairing => "pairing",
            Self::Credential => "credential",
        }
    }
}

/// What a closed surface resolved to
#[derive(Debug, Clone)]
pub enum SurfaceOutcome {
    /// The surface was seen and closed
    Acknowledged,
    /// An explicit accept/deny choice; closing without choosing yields `false`
    Choice(bool),
    /// The entered credential, `None` when closed without input
    Secret(Option<String>),
}

/// Presentation layer for approval surfaces.
///
/// Implementations must resolve every call eventually — a surface the user
/// closes without an explicit choice resolves with the deny/empty default,
/// never hangs.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Present a message the user acknowledges (info, warning, error)
    async fn acknowledge(&self, kind: SurfaceKind, text: &str);

    /// Present an accept/deny choice (question, pairing). Closing the
    /// surface without choosing must return `false`.
    async fn confirm(&self, kind: SurfaceKind, text: &str) -> bool;

    /// Present a masked entry surface. Closing without input must return
    /// `None`.
    async fn collect_secret(&self, text: &str) -> Option<String>;

    /// Bring an already-open surface of `kind` to the front
    fn refocus(&self, kind: SurfaceKind) {
        let _ = kind;
    }

    /// Open a link in the user's default browser
    fn open_external(&self, link: &str);
}

type SharedOutcome = Shared<BoxFuture<'static, SurfaceOutcome>>;

/// Registry of live approval surfaces: at most one per kind.
///
/// Replaces ambient per-window globals with explicit acquire/release — a
/// surface registers when opened and removes itself when its future
/// resolves.
#[derive(Default)]
pub struct SurfaceRegistry {
    live: Mutex<HashMap<SurfaceKind, SharedOutcome>>,
}

impl SurfaceRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of currently open surfaces
    pub fn open_count(&self) -> usize {
        self.live.lock().expect("surface registry lock poisoned").len()
    }

    /// Whether a surface of `kind` is currently open
    pub fn is_open(&self, kind: SurfaceKind) -> bool {
        self.live
            .lock()
            .expect("surface registry lock poisoned")
            .contains_key(&kind)
    }

    /// Present a surface of `kind`, or join the one already open.
    ///
    /// `open` is called only when no surface of this kind is live; otherwise
    /// the existing surface is refocused and its outcome shared with this
    /// caller.
    pub async fn present<F>(
        self: &Arc<Self>,
        kind: SurfaceKind,
        prompter: &Arc<dyn Prompter>,
        open: F,
    ) -> SurfaceOutcome
    where
        F: FnOnce() -> BoxFuture<'static, SurfaceOutcome>,
    {
        let outcome = {
            let mut live = self.live.lock().expect("surface registry lock poisoned");
            if let Some(existing) = live.get(&kind) {
                debug!("Reusing open {} surface", kind.label());
                prompter.refocus(kind);
                existing.clone()
            } else {
                let registry = Arc::clone(self);
                let inner = open();
                let wrapped = async move {
                    let outcome = inner.await;
                    registry
                        .live
                        .lock()
                        .expect("surface registry lock poisoned")
                        .remove(&kind);
                    outcome
                }
                .boxed()
                .shared();
                live.insert(kind, wrapped.clone());
                wrapped
            }
        };

        outcome.await
    }
}

/// Present an acknowledgement surface (info, warning, error)
pub async fn acknowledge(
    surfaces: &Arc<SurfaceRegistry>,
    prompter: &Arc<dyn Prompter>,
    kind: SurfaceKind,
    text: &str,
) {
    let p = Arc::clone(prompter);
    let t = text.to_string();
    surfaces
        .present(kind, prompter, move || {
            async move {
                p.acknowledge(kind, &t).await;
                SurfaceOutcome::Acknowledged
            }
            .boxed()
        })
        .await;
}

/// Present an accept/deny surface; `false` on close without a choice
pub async fn ask(
    surfaces: &Arc<SurfaceRegistry>,
    prompter: &Arc<dyn Prompter>,
    kind: SurfaceKind,
    text: &str,
) -> bool {
    let p = Arc::clone(prompter);
    let t = text.to_string();
    let outcome = surfaces
        .present(kind, prompter, move || {
            async move { SurfaceOutcome::Choice(p.confirm(kind, &t).await) }.boxed()
        })
        .await;

    match outcome {
        SurfaceOutcome::Choice(choice) => choice,
        _ => false,
    }
}

/// Present the masked credential-entry surface; `None` on close without input
pub async fn collect_secret(
    surfaces: &Arc<SurfaceRegistry>,
    prompter: &Arc<dyn Prompter>,
    text: &str,
) -> Option<String> {
    let p = Arc::clone(prompter);
    let t = text.to_string();
    let outcome = surfaces
        .present(SurfaceKind::Credential, prompter, move || {
            async move { SurfaceOutcome::Secret(p.collect_secret(&t).await) }.boxed()
        })
        .await;

    match outcome {
        SurfaceOutcome::Secret(secret) => secret,
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted prompter for tests: fixed answers, counted invocations,
    /// optional delay so singleton behavior can be observed.
    pub struct ScriptedPrompter {
        pub confirm_answer: bool,
        pub secret_answer: Option<String>,
        pub delay: Duration,
        pub confirms: AtomicUsize,
        pub acknowledgements: AtomicUsize,
        pub refocuses: AtomicUsize,
        pub opened_links: Mutex<Vec<String>>,
    }

    impl ScriptedPrompter {
        pub fn new(confirm_answer: bool, secret_answer: Option<String>) -> Arc<Self> {
            Arc::new(Self {
                confirm_answer,
                secret_answer,
                delay: Duration::from_millis(10),
                confirms: AtomicUsize::new(0),
                acknowledgements: AtomicUsize::new(0),
                refocuses: AtomicUsize::new(0),
                opened_links: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Prompter for ScriptedPrompter {
        async fn acknowledge(&self, _kind: SurfaceKind, _text: &str) {
            self.acknowledgements.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
        }

        async fn confirm(&self, _kind: SurfaceKind, _text: &str) -> bool {
            self.confirms.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.confirm_answer
        }

        async fn collect_secret(&self, _text: &str) -> Option<String> {
            tokio::time::sleep(self.delay).await;
            self.secret_answer.clone()
        }

        fn refocus(&self, _kind: SurfaceKind) {
            self.refocuses.fetch_add(1, Ordering::SeqCst);
        }

        fn open_external(&self, link: &str) {
            self.opened_links
                .lock()
                .expect("lock poisoned")
                .push(link.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedPrompter;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_concurrent_same_kind_requests_share_one_surface() {
        let surfaces = SurfaceRegistry::new();
        let scripted = ScriptedPrompter::new(true, None);
        let prompter: Arc<dyn Prompter> = scripted.clone();

        let (a, b) = tokio::join!(
            ask(&surfaces, &prompter, SurfaceKind::Question, "first?"),
            ask(&surfaces, &prompter, SurfaceKind::Question, "second?"),
        );

        assert!(a);
        assert!(b);
        // One surface opened, the other caller joined and refocused it.
        assert_eq!(scripted.confirms.load(Ordering::SeqCst), 1);
        assert_eq!(scripted.refocuses.load(Ordering::SeqCst), 1);
        assert_eq!(surfaces.open_count(), 0);
    }

    #[tokio::test]
    async fn test_different_kinds_are_concurrent() {
        let surfaces = SurfaceRegistry::new();
        let scripted = ScriptedPrompter::new(true, Some("1234".into()));
        let prompter: Arc<dyn Prompter> = scripted.clone();

        let (choice, secret) = tokio::join!(
            ask(&surfaces, &prompter, SurfaceKind::Pairing, "pair?"),
            collect_secret(&surfaces, &prompter, "pin?"),
        );

        assert!(choice);
        assert_eq!(secret.as_deref(), Some("1234"));
        assert_eq!(scripted.refocuses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_surface_releases_its_slot_after_close() {
        let surfaces = SurfaceRegistry::new();
        let scripted = ScriptedPrompter::new(false, None);
        let prompter: Arc<dyn Prompter> = scripted.clone();

        ask(&surfaces, &prompter, SurfaceKind::Question, "once?").await;
        assert!(!surfaces.is_open(SurfaceKind::Question));

        // A later request opens a fresh surface instead of joining a dead one.
        ask(&surfaces, &prompter, SurfaceKind::Question, "twice?").await;
        assert_eq!(scripted.confirms.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_without_choice_defaults_to_deny() {
        let surfaces = SurfaceRegistry::new();
        let prompter: Arc<dyn Prompter> = ScriptedPrompter::new(false, None);

        assert!(!ask(&surfaces, &prompter, SurfaceKind::Pairing, "pair?").await);
    }
}
