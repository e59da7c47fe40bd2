//! Authentication mode, credential form, bearer token and profile.
//!
//! `authenticated` is never stored: it is derived from a non-empty token and a
//! present profile, so no interleaving of the login and refresh calls can
//! produce an authenticated session without a profile.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use shared::{
    domain::{AuthMode, Profile},
    protocol::{SignupRequest, TokenRequest},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, Result},
    transport::IdentityService,
    ClientEvent,
};

pub const SIGNUP_FAILED: &str = "Signup failed.";
pub const LOGIN_FAILED: &str = "Login failed.";
pub const SIGNUP_SUCCEEDED: &str = "Account created! Redirecting to sign in...";
pub const MISSING_FIELDS: &str = "Please fill in all required fields.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
}

impl Credentials {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            name: name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_empty() && self.password.is_empty() && self.name.is_empty()
    }

    fn complete_for(&self, mode: AuthMode) -> bool {
        let base = !self.email.trim().is_empty() && !self.password.is_empty();
        match mode {
            AuthMode::SignIn => base,
            AuthMode::SignUp => base && !self.name.trim().is_empty(),
        }
    }
}

/// Single-slot transient notices. A new notice replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Feedback {
    pub error: Option<String>,
    pub success: Option<String>,
}

impl Feedback {
    pub fn clear(&mut self) {
        self.error = None;
        self.success = None;
    }

    pub fn is_empty(&self) -> bool {
        self.error.is_none() && self.success.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub mode: AuthMode,
    pub credentials: Credentials,
    pub show_password: bool,
    pub feedback: Feedback,
    pub auth_busy: bool,
    #[serde(skip_serializing)]
    pub token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub profile: Option<Profile>,
}

impl SessionState {
    pub fn authenticated(&self) -> bool {
        !self.token.is_empty() && self.profile.is_some()
    }

    /// A token was issued but no profile could be loaded with it yet.
    pub fn awaiting_profile(&self) -> bool {
        !self.token.is_empty() && self.profile.is_none() && !self.auth_busy
    }

    fn clear_session(&mut self) {
        self.token.clear();
        self.token_type = None;
        self.expires_in = None;
        self.profile = None;
    }
}

pub struct SessionController {
    identity: Arc<dyn IdentityService>,
    signup_redirect_delay: Duration,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionController {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        signup_redirect_delay: Duration,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            signup_redirect_delay,
            inner: Mutex::new(SessionState::default()),
            events,
        })
    }

    pub async fn snapshot(&self) -> SessionState {
        self.inner.lock().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.lock().await.authenticated()
    }

    /// The held bearer token, if any.
    pub async fn current_token(&self) -> Option<String> {
        let guard = self.inner.lock().await;
        (!guard.token.is_empty()).then(|| guard.token.clone())
    }

    /// The held token, only while the session is authenticated.
    pub async fn authenticated_token(&self) -> Option<String> {
        let guard = self.inner.lock().await;
        guard.authenticated().then(|| guard.token.clone())
    }

    pub async fn toggle_mode(&self) {
        let mode = {
            let mut guard = self.inner.lock().await;
            guard.mode = guard.mode.toggled();
            guard.credentials = Credentials::default();
            guard.feedback.clear();
            guard.mode
        };
        let _ = self.events.send(ClientEvent::ModeChanged(mode));
    }

    pub async fn set_email(&self, email: impl Into<String>) {
        let email = email.into();
        self.edit_form(|credentials| credentials.email = email).await;
    }

    pub async fn set_password(&self, password: impl Into<String>) {
        let password = password.into();
        self.edit_form(|credentials| credentials.password = password)
            .await;
    }

    pub async fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.edit_form(|credentials| credentials.name = name).await;
    }

    pub async fn toggle_password_visibility(&self) {
        {
            let mut guard = self.inner.lock().await;
            guard.show_password = !guard.show_password;
        }
        let _ = self.events.send(ClientEvent::SessionChanged);
    }

    async fn edit_form(&self, edit: impl FnOnce(&mut Credentials)) {
        {
            let mut guard = self.inner.lock().await;
            edit(&mut guard.credentials);
            guard.feedback.clear();
        }
        let _ = self.events.send(ClientEvent::SessionChanged);
    }

    /// Submits the form for the active mode. Does nothing while an auth call
    /// is already in flight.
    pub async fn submit(self: &Arc<Self>) -> Result<()> {
        let (mode, credentials) = {
            let mut guard = self.inner.lock().await;
            if guard.auth_busy {
                debug!("auth: submit ignored while a request is in flight");
                return Ok(());
            }
            if !guard.credentials.complete_for(guard.mode) {
                guard.feedback.success = None;
                guard.feedback.error = Some(MISSING_FIELDS.to_string());
                drop(guard);
                let _ = self.events.send(ClientEvent::SessionChanged);
                return Ok(());
            }
            (guard.mode, guard.credentials.clone())
        };

        match mode {
            AuthMode::SignUp => self.submit_signup(credentials).await,
            AuthMode::SignIn => self.submit_login(credentials).await,
        }
    }

    pub async fn submit_signup(self: &Arc<Self>, credentials: Credentials) -> Result<()> {
        self.begin_auth_call().await;

        let result = self
            .identity
            .signup(SignupRequest {
                email: credentials.email.clone(),
                password: credentials.password,
                name: credentials.name,
            })
            .await;

        {
            let mut guard = self.inner.lock().await;
            guard.auth_busy = false;
            match &result {
                Ok(_) => guard.feedback.success = Some(SIGNUP_SUCCEEDED.to_string()),
                Err(err) => guard.feedback.error = Some(err.user_message(SIGNUP_FAILED)),
            }
        }
        let _ = self.events.send(ClientEvent::SessionChanged);

        match result {
            Ok(_) => {
                info!(email = %credentials.email, "auth: account created");
                self.schedule_sign_in_redirect();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, kind = ?err.kind(), "auth: signup failed");
                Err(err)
            }
        }
    }

    fn schedule_sign_in_redirect(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(controller.signup_redirect_delay).await;
            {
                let mut guard = controller.inner.lock().await;
                guard.mode = AuthMode::SignIn;
                guard.feedback.success = None;
            }
            let _ = controller
                .events
                .send(ClientEvent::ModeChanged(AuthMode::SignIn));
        });
    }

    /// Token exchange, then profile fetch with that token. A failed profile
    /// fetch keeps the token but leaves the session unauthenticated; it is
    /// logged, not shown.
    pub async fn submit_login(&self, credentials: Credentials) -> Result<()> {
        self.begin_auth_call().await;

        let result = self.login_sequence(credentials).await;

        {
            let mut guard = self.inner.lock().await;
            guard.auth_busy = false;
            if let Err(err) = &result {
                guard.feedback.error = Some(err.user_message(LOGIN_FAILED));
            }
        }
        let _ = self.events.send(ClientEvent::SessionChanged);

        if let Err(err) = &result {
            warn!(error = %err, kind = ?err.kind(), "auth: login failed");
        }
        result
    }

    async fn login_sequence(&self, credentials: Credentials) -> Result<()> {
        let grant = self
            .identity
            .token(TokenRequest {
                username: credentials.email,
                password: credentials.password,
            })
            .await?;

        let token = grant
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ClientError::Unspecified("token response without access_token".into()))?;

        {
            let mut guard = self.inner.lock().await;
            guard.clear_session();
            guard.token = token.clone();
            guard.token_type = grant.token_type;
            guard.expires_in = grant.expires_in;
        }

        match self.identity.me(&token).await {
            Ok(profile) => {
                if self.apply_profile(&token, profile).await {
                    info!("auth: session established");
                }
            }
            Err(err) => {
                warn!(error = %err, "auth: profile fetch after login failed; session not authenticated");
            }
        }
        Ok(())
    }

    /// Best-effort profile reload with `token`. Failures are logged and leave
    /// the previous profile untouched. Returns whether a profile was applied.
    pub async fn refresh_profile(&self, token: &str) -> bool {
        match self.identity.me(token).await {
            Ok(profile) => self.apply_profile(token, profile).await,
            Err(err) => {
                warn!(error = %err, "auth: profile refresh failed");
                false
            }
        }
    }

    /// Refreshes with whatever token is currently held.
    pub async fn refresh_current_profile(&self) -> bool {
        match self.current_token().await {
            Some(token) => self.refresh_profile(&token).await,
            None => {
                debug!("auth: profile refresh skipped without a token");
                false
            }
        }
    }

    /// Replaces the profile wholesale, unless the token it was fetched with is
    /// no longer the held one.
    async fn apply_profile(&self, token: &str, profile: Profile) -> bool {
        {
            let mut guard = self.inner.lock().await;
            if guard.token.is_empty() || guard.token != token {
                debug!("auth: discarding profile fetched with a token that is no longer held");
                return false;
            }
            guard.profile = Some(profile);
        }
        let _ = self.events.send(ClientEvent::ProfileUpdated);
        let _ = self.events.send(ClientEvent::SessionChanged);
        true
    }

    /// Local-only reset of the session, form and notices. Idempotent.
    pub async fn logout(&self) {
        {
            let mut guard = self.inner.lock().await;
            guard.clear_session();
            guard.credentials = Credentials::default();
            guard.feedback.clear();
            guard.show_password = false;
        }
        let _ = self.events.send(ClientEvent::SessionChanged);
    }

    async fn begin_auth_call(&self) {
        {
            let mut guard = self.inner.lock().await;
            guard.auth_busy = true;
            guard.feedback.clear();
        }
        let _ = self.events.send(ClientEvent::SessionChanged);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
