use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use shared::domain::AuthMode;
use tokio::sync::broadcast;

pub mod config;
pub mod conversation;
pub mod error;
pub mod session;
pub mod transport;

pub use config::{load_settings, ClientSettings};
pub use conversation::{
    ConversationController, ConversationState, ExchangeOutcome, PendingExchange, Transcript,
};
pub use error::{ClientError, Result};
pub use session::{Credentials, Feedback, SessionController, SessionState};
pub use transport::{AssistantService, HttpAssistantService, HttpIdentityService, IdentityService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    SessionChanged,
    ModeChanged(AuthMode),
    ProfileUpdated,
    /// The transcript length changed; views should bring the newest entry
    /// into view.
    TranscriptChanged {
        len: usize,
    },
    ChatBusyChanged(bool),
}

/// The operations a view drives. Every state change goes through one of these.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    async fn toggle_mode(&self);
    async fn set_email(&self, email: &str);
    async fn set_password(&self, password: &str);
    async fn set_name(&self, name: &str);
    async fn toggle_password_visibility(&self);
    async fn submit(&self) -> Result<()>;
    async fn refresh_profile(&self) -> bool;
    async fn logout(&self);
    async fn set_input(&self, text: &str);
    async fn send_input(&self) -> ExchangeOutcome;
    async fn begin_message(&self, text: &str)
        -> std::result::Result<PendingExchange, ExchangeOutcome>;
    async fn finish_exchange(&self, pending: PendingExchange) -> ExchangeOutcome;
    async fn session_snapshot(&self) -> SessionState;
    async fn conversation_snapshot(&self) -> ConversationState;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

pub struct MemoryChatClient {
    session: Arc<SessionController>,
    conversation: Arc<ConversationController>,
    events: broadcast::Sender<ClientEvent>,
}

impl MemoryChatClient {
    pub fn new(settings: &ClientSettings) -> Arc<Self> {
        let http = Client::new();
        Self::new_with_services(
            Arc::new(HttpIdentityService::new(
                http.clone(),
                settings.identity_url.clone(),
            )),
            Arc::new(HttpAssistantService::new(
                http,
                settings.assistant_url.clone(),
            )),
            settings.signup_redirect_delay(),
        )
    }

    pub fn new_with_services(
        identity: Arc<dyn IdentityService>,
        assistant: Arc<dyn AssistantService>,
        signup_redirect_delay: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let session = SessionController::new(identity, signup_redirect_delay, events.clone());
        let conversation = ConversationController::new(assistant, Arc::clone(&session), events.clone());
        Arc::new(Self {
            session,
            conversation,
            events,
        })
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn conversation(&self) -> &Arc<ConversationController> {
        &self.conversation
    }

    /// Clears the session and the transcript. No network call.
    pub async fn logout(&self) {
        self.session.logout().await;
        self.conversation.clear().await;
    }
}

#[async_trait]
impl ClientHandle for Arc<MemoryChatClient> {
    async fn toggle_mode(&self) {
        self.session.toggle_mode().await;
    }

    async fn set_email(&self, email: &str) {
        self.session.set_email(email).await;
    }

    async fn set_password(&self, password: &str) {
        self.session.set_password(password).await;
    }

    async fn set_name(&self, name: &str) {
        self.session.set_name(name).await;
    }

    async fn toggle_password_visibility(&self) {
        self.session.toggle_password_visibility().await;
    }

    async fn submit(&self) -> Result<()> {
        self.session.submit().await
    }

    async fn refresh_profile(&self) -> bool {
        self.session.refresh_current_profile().await
    }

    async fn logout(&self) {
        MemoryChatClient::logout(self).await;
    }

    async fn set_input(&self, text: &str) {
        self.conversation.set_input(text).await;
    }

    async fn send_input(&self) -> ExchangeOutcome {
        self.conversation.send_input().await
    }

    async fn begin_message(
        &self,
        text: &str,
    ) -> std::result::Result<PendingExchange, ExchangeOutcome> {
        self.conversation.begin_message(text).await
    }

    async fn finish_exchange(&self, pending: PendingExchange) -> ExchangeOutcome {
        self.conversation.finish_exchange(pending).await
    }

    async fn session_snapshot(&self) -> SessionState {
        self.session.snapshot().await
    }

    async fn conversation_snapshot(&self) -> ConversationState {
        self.conversation.snapshot().await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/fakes.rs"]
mod fakes;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
