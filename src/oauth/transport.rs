//! Transport decorator that checks bearer credentials before forwarding.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request};
use axum::response::Response;

use crate::oauth::error::AuthError;
use crate::oauth::validator::TokenValidator;
use crate::proxy::{TlsPolicy, Transport, TransportError};

/// Forwards only requests whose bearer token is valid and carries a
/// permitted scope; everything else is answered without contacting the
/// upstream.
pub struct OAuthAwareTransport {
    inner: Arc<dyn Transport>,
    validator: TokenValidator,
    scopes: BTreeSet<String>,
}

impl OAuthAwareTransport {
    /// `scopes` empty accepts any valid token.
    pub fn new(
        inner: Arc<dyn Transport>,
        validator: TokenValidator,
        scopes: BTreeSet<String>,
    ) -> Self {
        Self {
            inner,
            validator,
            scopes,
        }
    }
}

#[async_trait]
impl Transport for OAuthAwareTransport {
    async fn round_trip(
        &self,
        request: Request<Body>,
        tls: TlsPolicy,
    ) -> Result<Response, TransportError> {
        let token = bearer_token(request.headers())?.to_string();
        let grant = self.validator.validate(&token).await?;

        if !self.scopes.is_empty() && grant.scopes.is_disjoint(&self.scopes) {
            return Err(AuthError::InsufficientScope.into());
        }

        tracing::debug!(
            subject = grant.subject.as_deref().unwrap_or("-"),
            "Bearer credential accepted"
        );
        self.inner.round_trip(request, tls).await
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingCredential)?
        .to_str()
        .map_err(|_| AuthError::MalformedCredential)?;

    match value.trim().split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
            let token = token.trim();
            if token.is_empty() || token.contains(char::is_whitespace) {
                Err(AuthError::MalformedCredential)
            } else {
                Ok(token)
            }
        }
        _ => Err(AuthError::MalformedCredential),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{OAuthServerDefinition, TokenValidation};
    use crate::oauth::validator::Grant;
    use crate::store::InMemoryStore;
    use axum::http::{HeaderValue, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn round_trip(
            &self,
            _request: Request<Body>,
            _tls: TlsPolicy,
        ) -> Result<Response, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(Body::empty()))
        }
    }

    async fn transport_with_grant(
        scopes: &[&str],
        granted: &[&str],
    ) -> (OAuthAwareTransport, Arc<CountingTransport>) {
        let server = OAuthServerDefinition {
            id: "main".into(),
            name: String::new(),
            token_validation: TokenValidation::Store,
            scopes: BTreeSet::new(),
            endpoints: Vec::new(),
        };
        let validator =
            TokenValidator::new(&server, Arc::new(InMemoryStore::new()), reqwest::Client::new());
        let grant = Grant {
            subject: Some("alice".into()),
            scopes: granted.iter().map(|s| s.to_string()).collect(),
            expires_at: None,
        };
        validator.record_grant("good-token", &grant, None).await;

        let inner = Arc::new(CountingTransport::default());
        let transport = OAuthAwareTransport::new(
            inner.clone(),
            validator,
            scopes.iter().map(|s| s.to_string()).collect(),
        );
        (transport, inner)
    }

    fn request(authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("http://upstream/");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn rejected_requests_never_reach_upstream() {
        let (transport, inner) = transport_with_grant(&[], &[]).await;

        for auth in [None, Some("Basic abc"), Some("Bearer wrong-token")] {
            let err = transport
                .round_trip(request(auth), TlsPolicy::Verify)
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED, "{auth:?}");
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_token_is_forwarded() {
        let (transport, inner) = transport_with_grant(&["read"], &["read", "write"]).await;

        transport
            .round_trip(request(Some("bearer good-token")), TlsPolicy::Verify)
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_scope_is_forbidden() {
        let (transport, inner) = transport_with_grant(&["admin"], &["read"]).await;

        let err = transport
            .round_trip(request(Some("Bearer good-token")), TlsPolicy::Verify)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingCredential));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  abc "));
        assert_eq!(bearer_token(&headers), Ok("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(bearer_token(&headers), Err(AuthError::MalformedCredential));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer a b"));
        assert_eq!(bearer_token(&headers), Err(AuthError::MalformedCredential));
    }
}
