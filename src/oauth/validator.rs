//! Bearer token validation.
//!
//! # Responsibilities
//! - Verify JWTs locally against a shared secret
//! - Look up grants in the key-value store
//! - Ask the authorization server (RFC 7662 introspection) as a last resort
//! - Cache introspection results until the token or the cache bound expires
//!
//! # Design Decisions
//! - Checks run cheapest first and stop at the first definite answer
//! - Tokens are never stored in clear; cache keys hold a SHA-256 digest
//! - An unreachable store degrades to introspection instead of failing

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::definitions::{JwtAlgorithm, OAuthServerDefinition, TokenValidation};
use crate::oauth::error::AuthError;
use crate::store::KeyValueStore;

/// What a valid token grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Grant {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Unix timestamp (seconds) after which the grant is void.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl Grant {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Time left before expiry, if the grant expires at all.
    fn remaining(&self, now: u64) -> Option<Duration> {
        self.expires_at
            .map(|exp| Duration::from_secs(exp.saturating_sub(now)))
    }
}

/// `scope` claim, either space separated or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    Spaced(String),
    List(Vec<String>),
}

impl ScopeClaim {
    fn into_set(self) -> BTreeSet<String> {
        match self {
            ScopeClaim::Spaced(s) => s.split_whitespace().map(str::to_string).collect(),
            ScopeClaim::List(v) => v.into_iter().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: u64,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    scope: Option<ScopeClaim>,
    #[serde(default)]
    scp: Option<ScopeClaim>,
}

/// Local signature and expiry check.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, algorithm: JwtAlgorithm, leeway_secs: u64) -> Self {
        let algorithm = match algorithm {
            JwtAlgorithm::HS256 => Algorithm::HS256,
            JwtAlgorithm::HS384 => Algorithm::HS384,
            JwtAlgorithm::HS512 => Algorithm::HS512,
        };
        let mut validation = Validation::new(algorithm);
        validation.leeway = leeway_secs;
        validation.validate_exp = true;
        // Audience is not part of the grant model.
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Grant, AuthError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        let claims = data.claims;
        Ok(Grant {
            subject: claims.sub,
            scopes: claims
                .scope
                .or(claims.scp)
                .map(ScopeClaim::into_set)
                .unwrap_or_default(),
            expires_at: Some(claims.exp),
        })
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    sub: Option<String>,
}

/// RFC 7662 token introspection client.
pub struct IntrospectionClient {
    endpoint: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    http: reqwest::Client,
}

impl IntrospectionClient {
    pub fn new(
        endpoint: String,
        client_id: Option<String>,
        client_secret: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            endpoint,
            client_id,
            client_secret,
            http,
        }
    }

    pub async fn introspect(&self, token: &str) -> Result<Grant, AuthError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .form(&[("token", token), ("token_type_hint", "access_token")]);
        if let Some(client_id) = &self.client_id {
            request = request.basic_auth(client_id, self.client_secret.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::IntrospectionUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::IntrospectionUnavailable(format!(
                "introspection endpoint returned {}",
                response.status()
            )));
        }

        let body: IntrospectionResponse = response
            .json()
            .await
            .map_err(|e| AuthError::IntrospectionUnavailable(e.to_string()))?;

        if !body.active {
            return Err(AuthError::InvalidToken("token is not active".into()));
        }

        let grant = Grant {
            subject: body.sub,
            scopes: body
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            expires_at: body.exp,
        };
        if grant.is_expired(now_secs()) {
            return Err(AuthError::TokenExpired);
        }
        Ok(grant)
    }
}

enum Strategy {
    Jwt(JwtVerifier),
    Introspection {
        client: IntrospectionClient,
        cache_ttl: Duration,
    },
    Store,
}

/// Validates bearer tokens for one OAuth server.
pub struct TokenValidator {
    server_id: String,
    strategy: Strategy,
    store: Arc<dyn KeyValueStore>,
}

impl TokenValidator {
    pub fn new(
        server: &OAuthServerDefinition,
        store: Arc<dyn KeyValueStore>,
        http: reqwest::Client,
    ) -> Self {
        let strategy = match &server.token_validation {
            TokenValidation::Jwt {
                secret,
                algorithm,
                leeway_secs,
            } => Strategy::Jwt(JwtVerifier::new(secret, *algorithm, *leeway_secs)),
            TokenValidation::Introspection {
                endpoint,
                client_id,
                client_secret,
                ..
            } => Strategy::Introspection {
                client: IntrospectionClient::new(
                    endpoint.clone(),
                    client_id.clone(),
                    client_secret.clone(),
                    http,
                ),
                cache_ttl: server.token_validation.cache_ttl().unwrap_or_default(),
            },
            TokenValidation::Store => Strategy::Store,
        };

        Self {
            server_id: server.id.clone(),
            strategy,
            store,
        }
    }

    pub async fn validate(&self, token: &str) -> Result<Grant, AuthError> {
        if let Strategy::Jwt(verifier) = &self.strategy {
            return verifier.verify(token);
        }

        if let Some(grant) = self.lookup(token).await {
            return Ok(grant);
        }

        match &self.strategy {
            Strategy::Introspection { client, cache_ttl } => {
                let grant = client.introspect(token).await?;
                if !cache_ttl.is_zero() {
                    self.record_grant(token, &grant, Some(*cache_ttl)).await;
                }
                Ok(grant)
            }
            _ => Err(AuthError::InvalidToken("unknown token".into())),
        }
    }

    /// Store a grant for `token`, kept until the grant expires or `max_ttl`
    /// elapses, whichever comes first. Store failures are logged, not returned.
    pub async fn record_grant(&self, token: &str, grant: &Grant, max_ttl: Option<Duration>) {
        let now = now_secs();
        let ttl = match (grant.remaining(now), max_ttl) {
            (Some(left), Some(max)) => Some(left.min(max)),
            (left, max) => left.or(max),
        };
        if ttl.is_some_and(|t| t.is_zero()) {
            return;
        }

        let value = match serde_json::to_string(grant) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "Failed to encode grant");
                return;
            }
        };

        if let Err(e) = self.store.set(&self.cache_key(token), value, ttl).await {
            tracing::warn!(server = %self.server_id, error = %e, "Failed to store grant");
        }
    }

    async fn lookup(&self, token: &str) -> Option<Grant> {
        let key = self.cache_key(token);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(
                    server = %self.server_id,
                    error = %e,
                    "Key-value store unavailable, skipping cached grants"
                );
                return None;
            }
        };

        match serde_json::from_str::<Grant>(&raw) {
            Ok(grant) if !grant.is_expired(now_secs()) => Some(grant),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "Discarding unreadable cached grant");
                if let Err(e) = self.store.remove(&key).await {
                    tracing::debug!(server = %self.server_id, error = %e, "Failed to remove cached grant");
                }
                None
            }
        }
    }

    fn cache_key(&self, token: &str) -> String {
        cache_key(&self.server_id, token)
    }
}

/// Store key for a token's grant under one OAuth server.
pub fn cache_key(server_id: &str, token: &str) -> String {
    format!("oauth:{}:{}", server_id, hex::encode(Sha256::digest(token.as_bytes())))
}

fn now_secs() -> u64 {
    jsonwebtoken::get_current_timestamp()
}
