//! Collaborator seams for the identity and assistant services, plus their
//! HTTP implementations.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::Profile,
    error::ServiceRejection,
    protocol::{
        ChatRequest, ChatResponse, SignupRequest, SignupResponse, TokenRequest, TokenResponse,
    },
};

use crate::error::{ClientError, Result};

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn signup(&self, request: SignupRequest) -> Result<SignupResponse>;
    async fn token(&self, request: TokenRequest) -> Result<TokenResponse>;
    async fn me(&self, token: &str) -> Result<Profile>;
}

#[async_trait]
pub trait AssistantService: Send + Sync {
    async fn chat(&self, token: &str, request: ChatRequest) -> Result<ChatResponse>;
}

pub struct HttpIdentityService {
    http: Client,
    base_url: String,
}

impl HttpIdentityService {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn signup(&self, request: SignupRequest) -> Result<SignupResponse> {
        let res = self
            .http
            .post(format!("{}/signup", self.base_url))
            .json(&request)
            .send()
            .await?;
        // Signup only needs the status; whatever body came back is best-effort.
        let raw = checked(res).await?.text().await?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    async fn token(&self, request: TokenRequest) -> Result<TokenResponse> {
        let res = self
            .http
            .post(format!("{}/token", self.base_url))
            .form(&request)
            .send()
            .await?;
        decode(checked(res).await?).await
    }

    async fn me(&self, token: &str) -> Result<Profile> {
        let res = self
            .http
            .get(format!("{}/me", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        decode(checked(res).await?).await
    }
}

pub struct HttpAssistantService {
    http: Client,
    base_url: String,
}

impl HttpAssistantService {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AssistantService for HttpAssistantService {
    async fn chat(&self, token: &str, request: ChatRequest) -> Result<ChatResponse> {
        let res = self
            .http
            .post(format!("{}/chat", self.base_url))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        decode(checked(res).await?).await
    }
}

/// Turns a non-2xx response into a [`ServiceRejection`] carrying the body's
/// `detail`, if any.
async fn checked(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let raw = res.text().await.unwrap_or_default();
    Err(ServiceRejection::from_body(status.as_u16(), &raw).into())
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T> {
    let raw = res.text().await?;
    serde_json::from_str(&raw).map_err(|err| ClientError::Unspecified(err.to_string()))
}
