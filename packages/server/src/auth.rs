//! Bearer-token authentication.
//!
//! Handlers call [`authenticate`] or [`authenticate_admin`] and return the
//! error response as-is when it fails.

use std::collections::BTreeMap;

use actix_web::{HttpRequest, HttpResponse, http::header};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// User id.
    pub user_id: i64,
    /// Whether the caller may resolve and delete reports.
    pub is_admin: bool,
}

/// Resolves bearer tokens into identities.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the identity behind `token`, or `None` if it is unknown.
    async fn identify(&self, token: &str) -> Option<Identity>;
}

/// One entry of the `[[auth.tokens]]` configuration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    /// Opaque bearer token.
    pub token: String,
    /// User the token belongs to.
    pub user_id: i64,
    /// Grants administrator rights.
    #[serde(default)]
    pub admin: bool,
}

/// Fixed token table loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: BTreeMap<String, Identity>,
}

impl StaticTokens {
    /// Builds the table. Later entries win on duplicate tokens.
    #[must_use]
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|entry| {
                (
                    entry.token.clone(),
                    Identity {
                        user_id: entry.user_id,
                        is_admin: entry.admin,
                    },
                )
            })
            .collect();

        Self { tokens }
    }

    /// Number of configured tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokens {
    async fn identify(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).copied()
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
fn bearer_token(req: &HttpRequest) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authenticates the caller of `req`.
///
/// # Errors
///
/// Returns a 401 response if the token is missing or unknown.
pub async fn authenticate(
    authenticator: &dyn Authenticator,
    req: &HttpRequest,
) -> Result<Identity, HttpResponse> {
    let Some(token) = bearer_token(req) else {
        return Err(HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "Missing bearer token"
        })));
    };

    authenticator.identify(token).await.ok_or_else(|| {
        log::debug!("Rejected unknown bearer token");
        HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "Invalid bearer token"
        }))
    })
}

/// Authenticates the caller of `req` and requires administrator rights.
///
/// # Errors
///
/// Returns a 401 response as [`authenticate`] does, or 403 if the caller
/// is not an administrator.
pub async fn authenticate_admin(
    authenticator: &dyn Authenticator,
    req: &HttpRequest,
) -> Result<Identity, HttpResponse> {
    let identity = authenticate(authenticator, req).await?;
    if !identity.is_admin {
        log::warn!("User {} attempted an admin action", identity.user_id);
        return Err(HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Administrator rights required"
        })));
    }
    Ok(identity)
}
