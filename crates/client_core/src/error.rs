use shared::error::{FailureKind, ServiceRejection};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Rejected(#[from] ServiceRejection),
    #[error("connection failure: {0}")]
    Connection(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Unspecified(String),
}

impl ClientError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Rejected(_) => FailureKind::ValidationRejected,
            Self::Connection(_) => FailureKind::ConnectionFailure,
            Self::Unspecified(_) => FailureKind::Unspecified,
        }
    }

    /// Text to surface to the user: the service detail for rejections that
    /// carry one, `fallback` for everything else.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Rejected(rejection) => rejection
                .detail
                .clone()
                .unwrap_or_else(|| fallback.to_string()),
            _ => fallback.to_string(),
        }
    }
}
