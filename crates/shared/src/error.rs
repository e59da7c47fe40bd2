use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// How a failed collaborator call is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The service rejected the input; its detail is shown verbatim.
    ValidationRejected,
    /// Transport failure; only a generic message is shown.
    ConnectionFailure,
    /// A 2xx response without the fields the caller needed.
    Unspecified,
}

/// Error body returned by the services. `detail` is either a plain string or a
/// list of validation objects carrying `msg`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Value,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        detail_message(&self.detail)
    }
}

fn detail_message(detail: &Value) -> Option<String> {
    match detail {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(obj) => obj.get("msg").and_then(Value::as_str).map(str::to_owned),
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        _ => None,
    }
}

#[derive(Debug, Error)]
#[error("service rejected request ({status}): {}", .detail.as_deref().unwrap_or("no detail"))]
pub struct ServiceRejection {
    pub status: u16,
    pub detail: Option<String>,
}

impl ServiceRejection {
    pub fn from_body(status: u16, raw: &str) -> Self {
        let detail = serde_json::from_str::<ErrorBody>(raw)
            .ok()
            .and_then(|body| body.message());
        Self { status, detail }
    }
}
