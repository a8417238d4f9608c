use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

/// Per-field validation messages, keyed by form field name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    NotFound {
        message: String,
        redirect: Option<String>,
    },

    #[error("{message}")]
    BadRequest {
        message: String,
        redirect: Option<String>,
    },

    #[error("{message}")]
    Unauthorized {
        message: String,
        redirect: Option<String>,
    },

    #[error("validation failed")]
    Validation(FieldErrors),

    /// A collaborator that is not configured.
    #[error("{0}")]
    Unavailable(String),

    /// A collaborator that failed or timed out.
    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            redirect: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            redirect: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
            redirect: None,
        }
    }

    /// Attach the page a browser client should go back to.
    pub fn with_redirect(mut self, to: impl Into<String>) -> Self {
        match &mut self {
            Self::NotFound { redirect, .. }
            | Self::BadRequest { redirect, .. }
            | Self::Unauthorized { redirect, .. } => *redirect = Some(to.into()),
            _ => {}
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a FieldErrors>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::NotFound { message, redirect }
            | Self::BadRequest { message, redirect }
            | Self::Unauthorized { message, redirect } => ErrorBody {
                error: message,
                redirect: redirect.as_deref(),
                fields: None,
            },
            Self::Validation(fields) => ErrorBody {
                error: "validation failed",
                redirect: None,
                fields: Some(fields),
            },
            Self::Unavailable(message) | Self::Upstream(message) => ErrorBody {
                error: message,
                redirect: None,
                fields: None,
            },
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                ErrorBody {
                    error: "internal server error",
                    redirect: None,
                    fields: None,
                }
            }
        };

        (status, Json(body)).into_response()
    }
}
