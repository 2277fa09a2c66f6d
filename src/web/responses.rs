//! Response helpers and the error to status code mapping

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use crate::errors::{AppError, TunerError, UpstreamError};

pub const MPEGTS: &str = "video/mp2t";
pub const HLS_PLAYLIST: &str = "application/vnd.apple.mpegurl";
pub const OCTET_STREAM: &str = "application/octet-stream";

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            // A busy pool is reported like an unknown channel, the discovery
            // protocol has no distinct status for it
            AppError::ChannelNotFound { .. } | AppError::Tuner(TunerError::NoCapacity { .. }) => {
                StatusCode::NOT_FOUND
            }
            AppError::Tuner(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(UpstreamError::InvalidKeyPath { .. }) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Configuration { .. } | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        (status, axum::Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Streaming media response with the headers DVR clients expect
pub fn media_response(content_type: &'static str, body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("inline"),
    );
    response
}

/// Text document with an explicit content type
pub fn document(content_type: &'static str, body: String) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::channel_not_found("1"), StatusCode::NOT_FOUND),
            (
                TunerError::NoCapacity {
                    channel: "1".into(),
                    max_tuners: 2,
                }
                .into(),
                StatusCode::NOT_FOUND,
            ),
            (
                TunerError::ProcessSpawn {
                    channel: "1".into(),
                    message: "missing".into(),
                }
                .into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                UpstreamError::unavailable("https://origin.test/", "timeout").into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                UpstreamError::parse("landing page", "missing").into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                UpstreamError::InvalidKeyPath { path: "x".into() }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (AppError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected, "{error}");
        }
    }

    #[test]
    fn test_media_response_headers() {
        let response = media_response(MPEGTS, Body::empty());
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], MPEGTS);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::CONTENT_DISPOSITION], "inline");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-store");
    }
}
