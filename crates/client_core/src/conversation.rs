use std::{fmt, sync::Arc};

use serde::Serialize;
use shared::{
    domain::{ChatMessage, ChatRole, ExchangeId},
    error::FailureKind,
    protocol::ChatRequest,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::{session::SessionController, transport::AssistantService, ClientEvent};

pub const CHAT_FAILED: &str = "Sorry, something went wrong. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub exchange: ExchangeId,
    pub message: ChatMessage,
}

/// Append-only chat history. Each exchange is written in two phases: the
/// user's entry when it is sent and the assistant's entry when it settles.
/// Both writes are idempotent per exchange.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    next_exchange: u64,
}

impl Transcript {
    pub fn begin(&mut self, text: impl Into<String>) -> ExchangeId {
        let exchange = ExchangeId(self.next_exchange);
        self.next_exchange += 1;
        self.record_tentative(exchange, text);
        exchange
    }

    pub fn record_tentative(&mut self, exchange: ExchangeId, text: impl Into<String>) -> bool {
        if self.has_entry(exchange, ChatRole::User) {
            return false;
        }
        self.next_exchange = self.next_exchange.max(exchange.0 + 1);
        self.entries.push(TranscriptEntry {
            exchange,
            message: ChatMessage::user(text),
        });
        true
    }

    /// Appends the assistant entry for `exchange`. Ignored if the exchange has
    /// no user entry (e.g. the transcript was cleared meanwhile) or is
    /// already settled.
    pub fn settle(&mut self, exchange: ExchangeId, reply: impl Into<String>) -> bool {
        if !self.has_entry(exchange, ChatRole::User) || self.has_entry(exchange, ChatRole::Assistant)
        {
            return false;
        }
        self.entries.push(TranscriptEntry {
            exchange,
            message: ChatMessage::assistant(reply),
        });
        true
    }

    fn has_entry(&self, exchange: ExchangeId, role: ChatRole) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.exchange == exchange && entry.message.role == role)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().map(|entry| &entry.message)
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.entries.last().map(|entry| &entry.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationState {
    pub transcript: Transcript,
    pub input: String,
    pub chat_busy: bool,
}

impl ConversationState {
    pub fn can_send(&self) -> bool {
        !self.chat_busy && !self.input.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Nothing was sent: blank text or no authenticated session.
    Skipped,
    /// Nothing was sent: an earlier exchange is still waiting for its reply.
    Busy,
    Succeeded(ExchangeId),
    Failed(ExchangeId, FailureKind),
}

/// An exchange whose user entry is in the transcript and whose assistant call
/// has not been made yet.
pub struct PendingExchange {
    exchange: ExchangeId,
    text: String,
    token: String,
}

impl PendingExchange {
    pub fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Debug for PendingExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExchange")
            .field("exchange", &self.exchange)
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

pub struct ConversationController {
    assistant: Arc<dyn AssistantService>,
    session: Arc<SessionController>,
    inner: Mutex<ConversationState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ConversationController {
    pub fn new(
        assistant: Arc<dyn AssistantService>,
        session: Arc<SessionController>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            assistant,
            session,
            inner: Mutex::new(ConversationState::default()),
            events,
        })
    }

    pub async fn snapshot(&self) -> ConversationState {
        self.inner.lock().await.clone()
    }

    pub async fn set_input(&self, text: impl Into<String>) {
        self.inner.lock().await.input = text.into();
    }

    /// Sends the current input buffer.
    pub async fn send_input(&self) -> ExchangeOutcome {
        match self.begin_input().await {
            Ok(pending) => self.finish_exchange(pending).await,
            Err(outcome) => outcome,
        }
    }

    pub async fn send_message(&self, text: &str) -> ExchangeOutcome {
        match self.begin_message(text).await {
            Ok(pending) => self.finish_exchange(pending).await,
            Err(outcome) => outcome,
        }
    }

    /// First phase of an exchange: appends the user entry, clears the input
    /// and marks the conversation busy, all under one lock. Nothing is sent
    /// yet; hand the result to [`Self::finish_exchange`].
    pub async fn begin_message(
        &self,
        text: &str,
    ) -> std::result::Result<PendingExchange, ExchangeOutcome> {
        self.begin_with(|_| text.to_string()).await
    }

    /// Like [`Self::begin_message`], taking the text from the input buffer.
    pub async fn begin_input(&self) -> std::result::Result<PendingExchange, ExchangeOutcome> {
        self.begin_with(|state| state.input.clone()).await
    }

    async fn begin_with(
        &self,
        source: impl FnOnce(&ConversationState) -> String,
    ) -> std::result::Result<PendingExchange, ExchangeOutcome> {
        let token = self.session.authenticated_token().await;

        let (pending, len) = {
            let mut guard = self.inner.lock().await;
            let text = source(&*guard).trim().to_string();
            if text.is_empty() {
                return Err(ExchangeOutcome::Skipped);
            }
            let Some(token) = token else {
                warn!("chat: message dropped outside an authenticated session");
                return Err(ExchangeOutcome::Skipped);
            };
            if guard.chat_busy {
                debug!("chat: message refused while a reply is pending");
                return Err(ExchangeOutcome::Busy);
            }
            let exchange = guard.transcript.begin(text.clone());
            guard.input.clear();
            guard.chat_busy = true;
            (
                PendingExchange {
                    exchange,
                    text,
                    token,
                },
                guard.transcript.len(),
            )
        };
        let _ = self.events.send(ClientEvent::TranscriptChanged { len });
        let _ = self.events.send(ClientEvent::ChatBusyChanged(true));
        Ok(pending)
    }

    /// Second phase: calls the assistant, settles the exchange and clears the
    /// busy flag whatever the outcome.
    pub async fn finish_exchange(&self, pending: PendingExchange) -> ExchangeOutcome {
        let PendingExchange {
            exchange,
            text,
            token,
        } = pending;

        let result = self
            .assistant
            .chat(&token, ChatRequest { message: text })
            .await;

        let outcome = match result {
            Ok(response) => {
                let reply = response.response.unwrap_or_default();
                self.settle(exchange, reply).await;
                self.spawn_profile_refresh(token);
                ExchangeOutcome::Succeeded(exchange)
            }
            Err(err) => {
                warn!(error = %err, exchange = exchange.0, "chat: assistant call failed");
                self.settle(exchange, CHAT_FAILED).await;
                ExchangeOutcome::Failed(exchange, err.kind())
            }
        };

        self.inner.lock().await.chat_busy = false;
        let _ = self.events.send(ClientEvent::ChatBusyChanged(false));
        outcome
    }

    async fn settle(&self, exchange: ExchangeId, reply: impl Into<String>) {
        let len = {
            let mut guard = self.inner.lock().await;
            if !guard.transcript.settle(exchange, reply) {
                debug!(exchange = exchange.0, "chat: reply dropped for an exchange no longer in the transcript");
                return;
            }
            guard.transcript.len()
        };
        let _ = self.events.send(ClientEvent::TranscriptChanged { len });
    }

    /// The assistant may have changed the stored memory; reload the profile
    /// without holding up the chat turn.
    fn spawn_profile_refresh(&self, token: String) {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            session.refresh_profile(&token).await;
        });
    }

    pub async fn clear(&self) {
        {
            let mut guard = self.inner.lock().await;
            guard.transcript.clear();
            guard.input.clear();
        }
        let _ = self
            .events
            .send(ClientEvent::TranscriptChanged { len: 0 });
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
