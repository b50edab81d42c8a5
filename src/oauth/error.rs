//! Credential check failures.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response::error_response;

/// Why a request was refused by a protected route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer credential")]
    MissingCredential,

    #[error("malformed authorization header")]
    MalformedCredential,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,

    #[error("token lacks a permitted scope")]
    InsufficientScope,

    #[error("token introspection unavailable: {0}")]
    IntrospectionUnavailable(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InsufficientScope => StatusCode::FORBIDDEN,
            AuthError::IntrospectionUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// RFC 6750 error code for the `WWW-Authenticate` challenge.
    fn challenge_code(&self) -> Option<&'static str> {
        match self {
            AuthError::MissingCredential => None,
            AuthError::MalformedCredential => Some("invalid_request"),
            AuthError::InvalidToken(_) | AuthError::TokenExpired => Some("invalid_token"),
            AuthError::InsufficientScope => Some("insufficient_scope"),
            AuthError::IntrospectionUnavailable(_) => None,
        }
    }

    /// Message safe to return to the client.
    fn public_message(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing bearer credential",
            AuthError::MalformedCredential => "malformed authorization header",
            AuthError::InvalidToken(_) => "invalid token",
            AuthError::TokenExpired => "token expired",
            AuthError::InsufficientScope => "insufficient scope",
            AuthError::IntrospectionUnavailable(_) => "authorization server unavailable",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut response = error_response(self.status(), self.public_message());

        if matches!(self.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            let challenge = match self.challenge_code() {
                Some(code) => format!("Bearer realm=\"gateway\", error=\"{}\"", code),
                None => "Bearer realm=\"gateway\"".to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(AuthError::MissingCredential.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InsufficientScope.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::IntrospectionUnavailable("down".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn rejections_carry_bearer_challenge() {
        let response = AuthError::InvalidToken("bad signature".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            "Bearer realm=\"gateway\", error=\"invalid_token\""
        );

        let response = AuthError::IntrospectionUnavailable("timeout".into()).into_response();
        assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
