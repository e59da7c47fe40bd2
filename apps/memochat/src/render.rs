//! Turns controller snapshots into terminal lines. Only differences since the
//! previous render are printed, so the transcript scrolls like a chat log.

use client_core::{ConversationState, Feedback, SessionState};
use shared::domain::{AuthMode, ChatRole, Memory, Profile};

#[derive(Default)]
pub struct View {
    printed_len: usize,
    mode: AuthMode,
    authenticated: bool,
    feedback: Feedback,
    memory: Option<Memory>,
    chat_busy: bool,
    auth_busy: bool,
    awaiting_profile: bool,
}

impl View {
    pub fn diff(&mut self, session: &SessionState, conversation: &ConversationState) -> Vec<String> {
        let mut lines = Vec::new();

        if session.mode != self.mode && !session.authenticated() {
            self.mode = session.mode;
            lines.extend(mode_banner(session.mode));
        }

        if session.auth_busy && !self.auth_busy {
            lines.push("... contacting the identity service".to_string());
        }
        self.auth_busy = session.auth_busy;

        if session.feedback != self.feedback {
            if let Some(error) = &session.feedback.error {
                lines.push(format!("error: {error}"));
            }
            if let Some(success) = &session.feedback.success {
                lines.push(format!("ok: {success}"));
            }
            self.feedback = session.feedback.clone();
        }

        let awaiting_profile = session.awaiting_profile();
        if awaiting_profile && !self.awaiting_profile {
            lines.push("Signed in, but your profile could not be loaded. Try /refresh.".to_string());
        }
        self.awaiting_profile = awaiting_profile;

        let authenticated = session.authenticated();
        if authenticated != self.authenticated {
            self.authenticated = authenticated;
            if let Some(profile) = session.profile.as_ref().filter(|_| authenticated) {
                lines.push(format!("Signed in as {}", display_name(profile)));
                lines.extend(token_line(session));
                lines.extend(memory_lines(profile));
                lines.push(
                    "Type a message to chat, or /memory, /refresh, /logout, /quit.".to_string(),
                );
                self.memory = Some(profile.memory.clone());
            } else {
                lines.push("Signed out.".to_string());
                self.memory = None;
                self.mode = session.mode;
                lines.extend(mode_banner(session.mode));
            }
        } else if authenticated {
            if let Some(profile) = &session.profile {
                if self.memory.as_ref() != Some(&profile.memory) {
                    lines.push("(memory updated)".to_string());
                    lines.extend(memory_lines(profile));
                    self.memory = Some(profile.memory.clone());
                }
            }
        }

        let transcript = &conversation.transcript;
        if transcript.len() < self.printed_len {
            self.printed_len = transcript.len();
        }
        for message in transcript.messages().skip(self.printed_len) {
            let speaker = match message.role {
                ChatRole::User => "you",
                ChatRole::Assistant => "assistant",
            };
            lines.push(format!("{speaker}: {}", message.text));
        }
        self.printed_len = transcript.len();

        if conversation.chat_busy && !self.chat_busy {
            lines.push("assistant is thinking...".to_string());
        }
        self.chat_busy = conversation.chat_busy;

        lines
    }
}

pub fn mode_banner(mode: AuthMode) -> Vec<String> {
    match mode {
        AuthMode::SignIn => vec![
            "== Sign in ==".to_string(),
            "/email <address>, /password <secret>, /submit  (/mode to create an account)"
                .to_string(),
        ],
        AuthMode::SignUp => vec![
            "== Create an account ==".to_string(),
            "/name <display name>, /email <address>, /password <secret>, /submit  (/mode to sign in)"
                .to_string(),
        ],
    }
}

pub fn form_lines(session: &SessionState) -> Vec<String> {
    let credentials = &session.credentials;
    let password = if session.show_password {
        credentials.password.clone()
    } else {
        "*".repeat(credentials.password.chars().count())
    };
    let mut lines = Vec::new();
    if session.mode == AuthMode::SignUp {
        lines.push(format!("  name:     {}", credentials.name));
    }
    lines.push(format!("  email:    {}", credentials.email));
    lines.push(format!("  password: {password}"));
    lines
}

pub fn memory_lines(profile: &Profile) -> Vec<String> {
    vec![
        format!("  likes:    {}", list_or_none(&profile.memory.likes)),
        format!("  dislikes: {}", list_or_none(&profile.memory.dislikes)),
    ]
}

fn token_line(session: &SessionState) -> Option<String> {
    let kind = session.token_type.as_deref().unwrap_or("bearer");
    match session.expires_in {
        Some(secs) => Some(format!("  token:    {kind}, expires in {}", expiry(secs))),
        None if session.token_type.is_some() => Some(format!("  token:    {kind}")),
        None => None,
    }
}

fn expiry(secs: u64) -> String {
    if secs >= 60 && secs % 60 == 0 {
        format!("{} min", secs / 60)
    } else {
        format!("{secs} s")
    }
}

fn display_name(profile: &Profile) -> String {
    if profile.name.is_empty() {
        profile.email.clone()
    } else {
        format!("{} <{}>", profile.name, profile.email)
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none yet)".to_string()
    } else {
        items.join(", ")
    }
}
