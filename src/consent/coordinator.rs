//! The consent coordinator: consumer loop over proxy-server events.
//!
//! Each inbound event maps to an approval flow. Flows are spawned so
//! surfaces of different kinds can be open at the same time; the per-kind
//! singleton rule is enforced by the [`SurfaceRegistry`].

use std::sync::Arc;

use rand::RngCore;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::consent::surface::{self, Prompter, SurfaceKind, SurfaceRegistry};
use crate::proxy::{Card, NotifyRequest, ServerEvent};
use crate::types::TrustError;

/// Message shown when an unrecognized token is detected
const NEW_TOKEN_MESSAGE: &str = "We detected an unsupported smart card or token.\n\n\
                                 Would you like to request support be added for this token?";

/// Rejection for a credential surface closed with no input
const EMPTY_PIN_MESSAGE: &str = "Incorrect PIN value. It cannot be empty.";

/// Length of the random correlation token in a support report (bytes)
const CORRELATION_BYTES: usize = 20;

/// Where and how support requests for unrecognized tokens are filed
#[derive(Debug, Clone)]
pub struct SupportConfig {
    /// Issue-tracker "new issue" link
    pub link: String,
    /// Report body template; `${reader}`, `${atr}` and `${driver}` are
    /// substituted before filing
    pub template: String,
}

impl SupportConfig {
    /// The default report template
    pub fn default_template() -> String {
        "A new unsupported token was detected.\n\n\
         Reader: ${reader}\n\
         ATR: ${atr}\n\
         Correlation: ${driver}\n"
            .to_string()
    }
}

/// Drives proxy-server events through human-approval flows
pub struct ConsentCoordinator {
    surfaces: Arc<SurfaceRegistry>,
    prompter: Arc<dyn Prompter>,
    support: SupportConfig,
}

impl ConsentCoordinator {
    /// Create a coordinator
    pub fn new(
        surfaces: Arc<SurfaceRegistry>,
        prompter: Arc<dyn Prompter>,
        support: SupportConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            surfaces,
            prompter,
            support,
        })
    }

    /// Consume the event stream until the proxy closes it.
    ///
    /// Attach before client traffic is expected: every event kind the proxy
    /// emits is handled here.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::Listening(addr) => info!("Server: started at {}", addr),
                ServerEvent::Info(message) => info!("{}", message),
                ServerEvent::Error(message) => error!("Server: {}", message),
                ServerEvent::Close(reason) => info!("Close: {}", reason),
                ServerEvent::TokenError(message) => {
                    error!("Token: {}", message);
                    // Non-blocking advisory; the event loop keeps consuming.
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        surface::acknowledge(
                            &this.surfaces,
                            &this.prompter,
                            SurfaceKind::Warning,
                            &message,
                        )
                        .await;
                    });
                }
                ServerEvent::TokenNew(card) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.handle_new_token(card).await });
                }
                ServerEvent::Notify(request) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.handle_notify(request).await });
                }
            }
        }
        info!("Secure server event stream closed");
    }

    /// Unsupported-token flow: inform, optionally file a support request
    async fn handle_new_token(&self, card: Card) {
        info!(
            "New token was found reader: '{}' ATR: {}",
            card.reader,
            card.atr_hex()
        );

        let wants_support = surface::ask(
            &self.surfaces,
            &self.prompter,
            SurfaceKind::Question,
            NEW_TOKEN_MESSAGE,
        )
        .await;

        if wants_support {
            let mut correlation = [0u8; CORRELATION_BYTES];
            rand::rngs::OsRng.fill_bytes(&mut correlation);
            let link = self.support_report_link(&card, &hex::encode_upper(correlation));
            self.prompter.open_external(&link);
        }
    }

    /// Build the prefilled support-report link for an unrecognized token
    fn support_report_link(&self, card: &Card, correlation: &str) -> String {
        let atr = card.atr_hex();
        let title = format!("Add support for '{atr}' token");
        let body = self
            .support
            .template
            .replace("${reader}", &card.reader)
            .replace("${atr}", &atr)
            .replace("${driver}", correlation);

        format!(
            "{}?title={}&body={}",
            self.support.link,
            urlencoding::encode(&title),
            urlencoding::encode(&body)
        )
    }

    /// Resolve one approval request; the responder is always satisfied
    async fn handle_notify(&self, request: NotifyRequest) {
        match request {
            NotifyRequest::PairingApproval { origin, responder } => {
                let text = format!(
                    "{origin} is requesting to pair with your local keys. Allow?"
                );
                let accepted = surface::ask(
                    &self.surfaces,
                    &self.prompter,
                    SurfaceKind::Pairing,
                    &text,
                )
                .await;

                info!(
                    "Pairing request from {} {}",
                    origin,
                    if accepted { "accepted" } else { "denied" }
                );
                if responder.send(accepted).is_err() {
                    warn!("Pairing requester for {} went away before resolution", origin);
                }
            }
            NotifyRequest::PinEntry { origin, responder } => {
                let text = format!("Enter the PIN for {origin}");
                let entered =
                    surface::collect_secret(&self.surfaces, &self.prompter, &text).await;

                let result = match entered {
                    Some(pin) if !pin.is_empty() => Ok(pin),
                    _ => {
                        info!("PIN entry for {} closed without a value", origin);
                        Err(TrustError::Consent(EMPTY_PIN_MESSAGE.to_string()))
                    }
                };
                if responder.send(result).is_err() {
                    warn!("PIN requester for {} went away before resolution", origin);
                }
            }
            NotifyRequest::Unknown { kind } => {
                // Fatal for this request only: nothing to resolve, the
                // proxy observes the dropped responder as a rejection.
                error!("Unknown notify request type '{}'", kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::surface::test_support::ScriptedPrompter;
    use tokio::sync::oneshot;

    fn coordinator(
        scripted: &Arc<ScriptedPrompter>,
    ) -> (Arc<ConsentCoordinator>, mpsc::Sender<ServerEvent>) {
        let surfaces = SurfaceRegistry::new();
        let prompter: Arc<dyn Prompter> = scripted.clone();
        let coordinator = ConsentCoordinator::new(
            surfaces,
            prompter,
            SupportConfig {
                link: "https://tracker.example/issues/new".into(),
                template: SupportConfig::default_template(),
            },
        );

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(Arc::clone(&coordinator).run(rx));
        (coordinator, tx)
    }

    #[tokio::test]
    async fn test_pairing_approval_resolves_with_choice() {
        let scripted = ScriptedPrompter::new(true, None);
        let (_c, tx) = coordinator(&scripted);

        let (responder, resolved) = oneshot::channel();
        tx.send(ServerEvent::Notify(NotifyRequest::PairingApproval {
            origin: "https://app.example".into(),
            responder,
        }))
        .await
        .unwrap();

        assert!(resolved.await.unwrap());
    }

    #[tokio::test]
    async fn test_pairing_closed_without_choice_is_denied() {
        let scripted = ScriptedPrompter::new(false, None);
        let (_c, tx) = coordinator(&scripted);

        let (responder, resolved) = oneshot::channel();
        tx.send(ServerEvent::Notify(NotifyRequest::PairingApproval {
            origin: "https://app.example".into(),
            responder,
        }))
        .await
        .unwrap();

        assert!(!resolved.await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_pin_is_rejected_never_accepted() {
        for empty in [None, Some(String::new())] {
            let scripted = ScriptedPrompter::new(true, empty);
            let (_c, tx) = coordinator(&scripted);

            let (responder, resolved) = oneshot::channel();
            tx.send(ServerEvent::Notify(NotifyRequest::PinEntry {
                origin: "token".into(),
                responder,
            }))
            .await
            .unwrap();

            let result = resolved.await.unwrap();
            assert!(matches!(result, Err(TrustError::Consent(_))));
        }
    }

    #[tokio::test]
    async fn test_non_empty_pin_resolves() {
        let scripted = ScriptedPrompter::new(true, Some("123456".into()));
        let (_c, tx) = coordinator(&scripted);

        let (responder, resolved) = oneshot::channel();
        tx.send(ServerEvent::Notify(NotifyRequest::PinEntry {
            origin: "token".into(),
            responder,
        }))
        .await
        .unwrap();

        assert_eq!(resolved.await.unwrap().unwrap(), "123456");
    }

    #[tokio::test]
    async fn test_new_token_accept_opens_prefilled_report() {
        let scripted = ScriptedPrompter::new(true, None);
        let (_c, tx) = coordinator(&scripted);

        tx.send(ServerEvent::TokenNew(Card {
            reader: "ACS ACR122".into(),
            atr: vec![0x3b, 0x8f],
        }))
        .await
        .unwrap();

        // Give the spawned flow time to run.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let links = scripted.opened_links.lock().unwrap().clone();
        assert_eq!(links.len(), 1);
        assert!(links[0].starts_with("https://tracker.example/issues/new?title="));
        assert!(links[0].contains("3B8F"));
    }

    #[tokio::test]
    async fn test_new_token_decline_opens_nothing() {
        let scripted = ScriptedPrompter::new(false, None);
        let (_c, tx) = coordinator(&scripted);

        tx.send(ServerEvent::TokenNew(Card {
            reader: "Reader".into(),
            atr: vec![0x01],
        }))
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(scripted.opened_links.lock().unwrap().is_empty());
    }

    #[test]
    fn test_support_report_link_substitutes_template_fields() {
        let surfaces = SurfaceRegistry::new();
        let scripted = ScriptedPrompter::new(true, None);
        let prompter: Arc<dyn Prompter> = scripted;
        let coordinator = ConsentCoordinator::new(
            surfaces,
            prompter,
            SupportConfig {
                link: "https://tracker.example/issues/new".into(),
                template: "reader=${reader} atr=${atr} driver=${driver}".into(),
            },
        );

        let card = Card {
            reader: "Gemalto PC Twin".into(),
            atr: vec![0xab, 0xcd],
        };
        let link = coordinator.support_report_link(&card, "FEED");

        assert!(link.contains(&urlencoding::encode("Add support for 'ABCD' token").into_owned()));
        assert!(link.contains(&urlencoding::encode("reader=Gemalto PC Twin atr=ABCD driver=FEED").into_owned()));
    }
}
