//! Bearer token authentication middleware with owner isolation.
//!
//! Validates tokens from the `Authorization` header through a
//! [`TokenVerifier`] and injects the resolved [`OwnerId`] for downstream
//! handlers. Owner tokens and producer credentials live in separate
//! verifiers, one per route group; on the producer route the resolved id
//! names the producer.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use homechef_core::OwnerId;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ErrorBody;

/// Resolves a bearer token to the principal it belongs to.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns the owner for a valid token, `None` otherwise.
    async fn verify(&self, token: &str) -> Option<OwnerId>;
}

/// Verifier over a fixed token table. Only SHA-256 digests are held.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    digests: HashMap<String, OwnerId>,
}

impl StaticTokenVerifier {
    /// Builds a verifier from owner and plaintext token pairs.
    pub fn new(tokens: impl IntoIterator<Item = (OwnerId, String)>) -> Self {
        let digests =
            tokens.into_iter().map(|(owner, token)| (token_digest(&token), owner)).collect();
        Self { digests }
    }

    /// Number of configured tokens.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Whether no tokens are configured.
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<OwnerId> {
        self.digests.get(&token_digest(token)).cloned()
    }
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extracts the token from a `Bearer <token>` Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Errors that can occur during bearer authentication.
#[derive(Debug)]
pub enum AuthError {
    /// The token is unknown.
    InvalidToken,
    /// The Authorization header is missing or not a bearer token.
    MissingHeader,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            Self::InvalidToken => "Invalid bearer token",
            Self::MissingHeader => "Missing bearer token",
        };

        let body = ErrorBody { error: "unauthorized".to_string(), message: message.to_string() };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Axum middleware that authenticates requests using bearer tokens.
pub async fn auth_middleware(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_bearer_token(req.headers()).ok_or(AuthError::MissingHeader)?;
    let owner = verifier.verify(&token).await.ok_or(AuthError::InvalidToken)?;

    debug!(principal = %owner, "request authenticated");
    req.extensions_mut().insert(owner);

    Ok(next.run(req).await)
}
