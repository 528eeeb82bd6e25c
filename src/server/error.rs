use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::server::dtos::error_dto::ErrorResponse;

pub type AppResult<T> = Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// a required query or form field was absent, the message is sent as is
    #[error("{0}")]
    MissingParameter(String),

    #[error("Invalid nested proxy URL")]
    MalformedNestedUrl,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// network failure, timeout, dns or an unreadable upstream body
    #[error("Failed to fetch {url}: {message}")]
    UpstreamFetch { url: String, message: String },

    #[error("Internal server error")]
    InternalServerError,

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    pub fn upstream(url: impl Into<String>, message: impl ToString) -> Self {
        Self::UpstreamFetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) | Self::MalformedNestedUrl | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamFetch { .. }
            | Self::InternalServerError
            | Self::InternalServerErrorWithContext(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// page rewriting answers with a browsable page instead of json so the user sees which site
    /// failed inside the proxied frame
    pub fn into_html_page(self, url: &str) -> Response {
        let detail = match &self {
            Self::UpstreamFetch { message, .. } => message.clone(),
            other => other.to_string(),
        };

        let body = format!(
            "<html><body><h1>Error accessing {}</h1><p>{}</p></body></html>",
            html_escape::encode_text(url),
            html_escape::encode_text(&detail)
        );

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            )],
            body,
        )
            .into_response()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Responding with {}: {}", status, self);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
