//! Credential Port (Driven Port)
//!
//! The bearer token is acquired and stored elsewhere; the client only asks
//! whether one is present and embeds it in the connection target.

/// Opaque bearer token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a token; blank strings are rejected.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    /// Raw token value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

/// Supplies the current bearer token.
pub trait CredentialProvider: Send + Sync + std::fmt::Debug {
    /// Current token, if one is available.
    fn token(&self) -> Option<BearerToken>;
}

/// Fixed token supplied at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<BearerToken>,
}

impl StaticCredentials {
    /// Provider returning `token` (blank means no token).
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: BearerToken::new(token),
        }
    }

    /// Provider that never has a token.
    #[must_use]
    pub const fn none() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<BearerToken> {
        self.token.clone()
    }
}

/// Reads the token from an environment variable on every call, so a
/// rotated token is picked up by the next reconnect.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    /// Default variable name.
    pub const DEFAULT_VAR: &'static str = "FEED_CLIENT_TOKEN";

    /// Provider reading `var`.
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

impl CredentialProvider for EnvCredentials {
    fn token(&self) -> Option<BearerToken> {
        std::env::var(&self.var).ok().and_then(BearerToken::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_token_is_absent() {
        assert!(StaticCredentials::new("  ").token().is_none());
        assert!(StaticCredentials::none().token().is_none());
    }

    #[test]
    fn debug_is_redacted() {
        let token = BearerToken::new("secret-value").unwrap();
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn static_token_is_returned() {
        let provider = StaticCredentials::new("abc");
        assert_eq!(provider.token().unwrap().expose(), "abc");
    }

    #[test]
    fn unset_env_var_has_no_token() {
        let provider = EnvCredentials::new("FEED_CLIENT_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(provider.token().is_none());
    }
}
