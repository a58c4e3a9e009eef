//! Connection Authentication
//!
//! The feed authenticates at the handshake: the user identity and bearer
//! token ride along as query parameters on the connection URL.
//!
//! # Identity Hint
//!
//! When the caller has no identity at hand, the `sub` / `user_id` /
//! `userId` claim of the token's JWT payload is used. The payload is only
//! base64url-decoded; the signature is **never verified**, so the value is
//! a hint for building the URL and must not be trusted for authorization.
//! The server is expected to authorize on the token alone.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;
use url::Url;

use crate::application::ports::BearerToken;
use crate::domain::error::ClientError;

/// Query parameter carrying the user identity.
pub const USER_ID_PARAM: &str = "user_id";

/// Query parameter carrying the bearer token.
pub const TOKEN_PARAM: &str = "token";

const IDENTITY_CLAIMS: [&str; 3] = ["sub", "user_id", "userId"];

/// Errors building the connection target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No identity supplied and none could be read from the token.
    #[error("no user identity supplied and none found in the token")]
    MissingIdentity,

    /// No bearer token available.
    #[error("no bearer token available")]
    MissingToken,

    /// Base URL is not a WebSocket URL.
    #[error("unsupported URL scheme '{0}', expected ws or wss")]
    UnsupportedScheme(String),
}

impl From<AuthError> for ClientError {
    fn from(err: AuthError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Pick the identity to connect with: the caller's if non-blank, otherwise
/// the unverified hint from the token.
///
/// # Errors
///
/// Returns [`AuthError::MissingIdentity`] when neither source has one.
pub fn resolve_identity(identity: &str, token: &BearerToken) -> Result<String, AuthError> {
    let identity = identity.trim();
    if !identity.is_empty() {
        return Ok(identity.to_string());
    }
    user_id_hint(token.expose()).ok_or(AuthError::MissingIdentity)
}

/// Build the connection URL with identity and token query parameters.
/// Existing parameters with the same names are replaced.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedScheme`] for non-WebSocket URLs.
pub fn build_connection_url(
    base: &Url,
    identity: &str,
    token: &BearerToken,
) -> Result<Url, AuthError> {
    match base.scheme() {
        "ws" | "wss" => {}
        other => return Err(AuthError::UnsupportedScheme(other.to_string())),
    }

    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != USER_ID_PARAM && k != TOKEN_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = base.clone();
    url.set_query(None);
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(USER_ID_PARAM, identity);
        pairs.append_pair(TOKEN_PARAM, token.expose());
    }
    Ok(url)
}

/// Connection URL with the token value masked, for logs.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == TOKEN_PARAM {
                (k.into_owned(), "[REDACTED]".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    if pairs.is_empty() {
        return redacted.to_string();
    }
    redacted.set_query(None);
    redacted.query_pairs_mut().extend_pairs(pairs);
    redacted.to_string()
}

/// Read the identity claim from a JWT payload without verifying it.
#[must_use]
pub fn user_id_hint(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

    IDENTITY_CLAIMS.iter().find_map(|claim| match claims.get(claim)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
