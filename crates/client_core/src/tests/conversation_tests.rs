use std::time::Duration;

use super::*;
use crate::{
    fakes::{eventually, profile, profile_with, FakeAssistant, FakeIdentity, Reply},
    session::Credentials,
};
use shared::protocol::ChatResponse;

struct Harness {
    session: Arc<SessionController>,
    conversation: Arc<ConversationController>,
    identity: Arc<FakeIdentity>,
    assistant: Arc<FakeAssistant>,
}

fn harness(identity: FakeIdentity, assistant: FakeAssistant) -> Harness {
    let (events, _) = broadcast::channel(64);
    let identity = Arc::new(identity);
    let assistant = Arc::new(assistant);
    let session = SessionController::new(
        Arc::clone(&identity) as Arc<dyn crate::transport::IdentityService>,
        Duration::from_secs(2),
        events.clone(),
    );
    let conversation = ConversationController::new(
        Arc::clone(&assistant) as Arc<dyn AssistantService>,
        Arc::clone(&session),
        events,
    );
    Harness {
        session,
        conversation,
        identity,
        assistant,
    }
}

async fn login(session: &SessionController) {
    session
        .submit_login(Credentials::new("a@b.com", "x", ""))
        .await
        .expect("login");
}

fn messages(state: &ConversationState) -> Vec<ChatMessage> {
    state.transcript.messages().cloned().collect()
}

#[tokio::test]
async fn blank_messages_are_ignored() {
    let h = harness(FakeIdentity::new(), FakeAssistant::replying("Noted!"));
    login(&h.session).await;

    assert_eq!(h.conversation.send_message("").await, ExchangeOutcome::Skipped);
    assert_eq!(
        h.conversation.send_message("  \n\t ").await,
        ExchangeOutcome::Skipped
    );

    let state = h.conversation.snapshot().await;
    assert!(state.transcript.is_empty());
    assert!(!state.chat_busy);
    assert!(h.assistant.calls.lock().await.is_empty());
}

#[tokio::test]
async fn successful_exchange_appends_reply_and_refreshes_profile_once() {
    let (identity, mut seen) = FakeIdentity::new().watch_profiles();
    let h = harness(identity, FakeAssistant::replying("Noted!"));
    login(&h.session).await;
    assert_eq!(seen.recv().await.as_deref(), Some("tok1"));

    let outcome = h.conversation.send_message("I like tea").await;
    assert!(matches!(outcome, ExchangeOutcome::Succeeded(_)));

    let state = h.conversation.snapshot().await;
    assert_eq!(
        messages(&state),
        vec![ChatMessage::user("I like tea"), ChatMessage::assistant("Noted!")]
    );
    assert!(!state.chat_busy);

    let calls = h.assistant.calls.lock().await.clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "tok1");
    assert_eq!(calls[0].1.message, "I like tea");

    let refreshed = tokio::time::timeout(Duration::from_secs(2), seen.recv())
        .await
        .expect("refresh issued");
    assert_eq!(refreshed.as_deref(), Some("tok1"));
    assert!(
        tokio::time::timeout(Duration::from_millis(50), seen.recv())
            .await
            .is_err(),
        "only one refresh per exchange"
    );
    assert_eq!(h.identity.me_calls.lock().await.len(), 2);
}

#[tokio::test]
async fn refresh_after_exchange_picks_up_new_memory() {
    let identity = FakeIdentity::new().with_profiles(vec![
        Reply::Ok(profile("A", "a@b.com")),
        Reply::Ok(profile_with("A", &["tea"], &[])),
    ]);
    let h = harness(identity, FakeAssistant::replying("Noted!"));
    login(&h.session).await;

    h.conversation.send_message("I like tea").await;

    let session = Arc::clone(&h.session);
    eventually(|| {
        let session = Arc::clone(&session);
        async move {
            session
                .snapshot()
                .await
                .profile
                .is_some_and(|p| p.memory.likes == vec!["tea".to_string()])
        }
    })
    .await;
}

#[tokio::test]
async fn failed_exchange_appends_generic_error_and_clears_busy() {
    let h = harness(
        FakeIdentity::new(),
        FakeAssistant::new(Reply::Reject(Some("quota exceeded"))),
    );
    login(&h.session).await;

    let outcome = h.conversation.send_message("hello").await;
    assert!(matches!(
        outcome,
        ExchangeOutcome::Failed(_, FailureKind::ValidationRejected)
    ));

    let state = h.conversation.snapshot().await;
    assert_eq!(
        messages(&state),
        vec![ChatMessage::user("hello"), ChatMessage::assistant(CHAT_FAILED)]
    );
    assert!(!state.chat_busy);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.identity.me_calls.lock().await.len(), 1, "no refresh after failure");
}

#[tokio::test]
async fn user_entry_is_visible_while_the_reply_is_pending() {
    let (assistant, gate) = FakeAssistant::replying("Noted!").gated();
    let h = harness(FakeIdentity::new(), assistant);
    login(&h.session).await;
    h.conversation.set_input("  I like tea ").await;

    let send = {
        let conversation = Arc::clone(&h.conversation);
        tokio::spawn(async move { conversation.send_input().await })
    };

    let conversation = Arc::clone(&h.conversation);
    eventually(|| {
        let conversation = Arc::clone(&conversation);
        async move { conversation.snapshot().await.chat_busy }
    })
    .await;

    let pending = h.conversation.snapshot().await;
    assert_eq!(messages(&pending), vec![ChatMessage::user("I like tea")]);
    assert!(pending.input.is_empty());
    assert!(!pending.can_send());

    gate.add_permits(1);
    let outcome = send.await.expect("join");
    assert!(matches!(outcome, ExchangeOutcome::Succeeded(_)));

    let done = h.conversation.snapshot().await;
    assert_eq!(done.transcript.len(), 2);
    assert!(!done.chat_busy);
}

#[tokio::test]
async fn failed_refresh_does_not_disturb_the_chat() {
    let identity = FakeIdentity::new().with_profiles(vec![
        Reply::Ok(profile("A", "a@b.com")),
        Reply::Malformed,
    ]);
    let h = harness(identity, FakeAssistant::replying("Noted!"));
    login(&h.session).await;

    let outcome = h.conversation.send_message("I like tea").await;
    assert!(matches!(outcome, ExchangeOutcome::Succeeded(_)));

    let identity = Arc::clone(&h.identity);
    eventually(|| {
        let identity = Arc::clone(&identity);
        async move { identity.me_calls.lock().await.len() == 2 }
    })
    .await;

    let session = h.session.snapshot().await;
    assert!(session.authenticated());
    assert_eq!(session.profile.map(|p| p.name), Some("A".to_string()));
    assert!(session.feedback.error.is_none());
    assert_eq!(h.conversation.snapshot().await.transcript.len(), 2);
}

#[tokio::test]
async fn sending_without_a_session_is_ignored() {
    let h = harness(FakeIdentity::new(), FakeAssistant::replying("Noted!"));

    assert_eq!(
        h.conversation.send_message("hello").await,
        ExchangeOutcome::Skipped
    );
    assert!(h.conversation.snapshot().await.transcript.is_empty());
    assert!(h.assistant.calls.lock().await.is_empty());
}

#[tokio::test]
async fn token_without_profile_cannot_chat() {
    let identity = FakeIdentity::new().with_profiles(vec![Reply::Reject(None)]);
    let h = harness(identity, FakeAssistant::replying("Noted!"));
    login(&h.session).await;

    let session = h.session.snapshot().await;
    assert!(session.awaiting_profile());
    assert!(!session.authenticated());

    h.conversation.set_input("hello").await;
    assert_eq!(h.conversation.send_input().await, ExchangeOutcome::Skipped);
    assert_eq!(
        h.conversation.send_message("hello").await,
        ExchangeOutcome::Skipped
    );

    let state = h.conversation.snapshot().await;
    assert!(state.transcript.is_empty());
    assert!(!state.chat_busy);
    assert!(h.assistant.calls.lock().await.is_empty());
}

#[tokio::test]
async fn second_message_is_refused_while_the_first_is_pending() {
    let (assistant, gate) = FakeAssistant::replying("Noted!").gated();
    let h = harness(FakeIdentity::new(), assistant);
    login(&h.session).await;

    let first = h.conversation.begin_message("first").await.expect("first begins");
    assert_eq!(first.text(), "first");
    let second = h.conversation.begin_message("second").await;
    assert!(matches!(second, Err(ExchangeOutcome::Busy)));

    let pending = h.conversation.snapshot().await;
    assert_eq!(messages(&pending), vec![ChatMessage::user("first")]);
    assert!(pending.chat_busy);

    gate.add_permits(1);
    let outcome = h.conversation.finish_exchange(first).await;
    assert!(matches!(outcome, ExchangeOutcome::Succeeded(_)));

    let done = h.conversation.snapshot().await;
    assert_eq!(
        messages(&done),
        vec![ChatMessage::user("first"), ChatMessage::assistant("Noted!")]
    );
    assert!(!done.chat_busy);
    let calls = h.assistant.calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.message, "first");
}

#[tokio::test]
async fn reply_arriving_after_clear_is_dropped() {
    let (assistant, gate) = FakeAssistant::replying("late").gated();
    let h = harness(FakeIdentity::new(), assistant);
    login(&h.session).await;

    let send = {
        let conversation = Arc::clone(&h.conversation);
        tokio::spawn(async move { conversation.send_message("hello").await })
    };
    let conversation = Arc::clone(&h.conversation);
    eventually(|| {
        let conversation = Arc::clone(&conversation);
        async move { conversation.snapshot().await.chat_busy }
    })
    .await;

    h.session.logout().await;
    h.conversation.clear().await;
    gate.add_permits(1);
    send.await.expect("join");

    let state = h.conversation.snapshot().await;
    assert!(state.transcript.is_empty());
    assert!(!state.chat_busy);
}

#[test]
fn settling_is_idempotent_per_exchange() {
    let mut transcript = Transcript::default();
    let first = transcript.begin("one");
    assert!(transcript.settle(first, "reply"));
    assert!(!transcript.settle(first, "reply again"));
    assert!(!transcript.record_tentative(first, "one"));
    assert_eq!(transcript.len(), 2);

    let second = transcript.begin("two");
    assert_ne!(first, second);
    assert_eq!(
        transcript.last(),
        Some(&ChatMessage::user("two"))
    );
}

#[test]
fn settling_an_unknown_exchange_is_ignored() {
    let mut transcript = Transcript::default();
    let exchange = transcript.begin("one");
    transcript.clear();
    assert!(!transcript.settle(exchange, "reply"));
    assert!(transcript.is_empty());

    let next = transcript.begin("two");
    assert!(next.0 > exchange.0, "ids are not reused after a clear");
}

#[test]
fn replayed_tentative_entry_is_written_once() {
    let mut transcript = Transcript::default();
    assert!(transcript.record_tentative(ExchangeId(4), "hello"));
    assert!(!transcript.record_tentative(ExchangeId(4), "hello"));
    assert!(transcript.settle(ExchangeId(4), "hi"));
    assert_eq!(transcript.begin("next"), ExchangeId(5));
    assert_eq!(
        transcript.entries().iter().map(|e| e.exchange.0).collect::<Vec<_>>(),
        vec![4, 4, 5]
    );
}

#[test]
fn chat_response_without_reply_field_decodes() {
    let response: ChatResponse = serde_json::from_str("{}").expect("decode");
    assert!(response.response.is_none());
}
