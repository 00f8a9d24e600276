//! Response classification.

use reqwest::StatusCode;
use serde::Deserialize;

use super::transport::HttpResponse;

/// Structured error body returned by the backend.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// What a response means to the rest of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    AuthFailure(StatusCode),
    NotFound { message: String },
    ContextRequired { message: String },
    Domain {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },
}

/// Classify a response. `context_required_code` is the structured error code
/// the backend uses when an operation needs a selected shop.
#[must_use]
pub fn classify(response: &HttpResponse, context_required_code: &str) -> Classification {
    let status = response.status;

    if status.is_success() {
        return Classification::Success;
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Classification::AuthFailure(status);
    }

    let parsed = serde_json::from_slice::<ErrorBody>(&response.body).ok();
    let code = parsed.as_ref().and_then(|b| b.code.clone());
    let message = parsed
        .and_then(|b| b.message)
        .unwrap_or_else(|| fallback_message(status));

    if code.as_deref() == Some(context_required_code) {
        return Classification::ContextRequired { message };
    }
    if status == StatusCode::NOT_FOUND {
        return Classification::NotFound { message };
    }

    Classification::Domain {
        status,
        code,
        message,
    }
}

fn fallback_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_string)
}
