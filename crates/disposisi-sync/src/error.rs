use disposisi_core::{PortalError, TransitionRequest};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error body returned by the backend. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    actual_status: Option<disposisi_core::DispositionStatus>,
}

impl ErrorBody {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn text(&self, status: u16, raw: &str) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| {
                if raw.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    raw.trim().to_string()
                }
            })
    }
}

impl SyncError {
    /// Map onto the shared taxonomy.
    ///
    /// `transition` supplies the hop and expected status a 409 refers to.
    pub fn into_portal(self, transition: Option<&TransitionRequest>) -> PortalError {
        match self {
            SyncError::Http(e) => PortalError::Network(e.to_string()),
            SyncError::Json(e) => PortalError::Network(format!("malformed response: {e}")),
            SyncError::Server { status, body } => {
                let parsed = ErrorBody::parse(&body);
                let text = parsed.text(status, &body);
                match status {
                    400 | 422 => PortalError::InvalidTransition(text),
                    401 | 403 => PortalError::Forbidden(text),
                    404 => PortalError::NotFound(text),
                    409 => match transition {
                        Some(req) => PortalError::Conflict {
                            hop: req.hop_id,
                            expected: req.expected_status,
                            actual: parsed.actual_status,
                        },
                        None => PortalError::InvalidTransition(text),
                    },
                    410 => PortalError::Gone(text),
                    _ => PortalError::Network(format!("HTTP {status}: {text}")),
                }
            }
        }
    }
}

impl From<SyncError> for PortalError {
    fn from(err: SyncError) -> Self {
        err.into_portal(None)
    }
}
