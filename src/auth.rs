use std::sync::Arc;

use crate::config::EndpointConfig;
use crate::error::TurnError;

/// Supplies the bearer token sent with each turn request.
///
/// Token acquisition is outside this crate; implementations only hand back
/// whatever is current. `Ok(None)` sends the request unauthenticated.
pub trait CredentialSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `TurnError::Credential` when a token exists but cannot be read.
    fn token(&self) -> Result<Option<String>, TurnError>;
}

/// A fixed token from configuration.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: Box<str>,
}

impl StaticToken {
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self {
            token: strip_bearer_prefix(token).into(),
        }
    }
}

impl CredentialSource for StaticToken {
    fn token(&self) -> Result<Option<String>, TurnError> {
        Ok(Some(self.token.to_string()))
    }
}

/// Reads the token from an environment variable on every request, so a
/// refreshed value is picked up without rebuilding the controller.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialSource for EnvToken {
    fn token(&self) -> Result<Option<String>, TurnError> {
        match std::env::var(&self.var) {
            Ok(value) => {
                let token = strip_bearer_prefix(&value);
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(TurnError::Credential(format!(
                "environment variable {} is not valid UTF-8",
                self.var
            ))),
        }
    }
}

#[inline]
fn strip_bearer_prefix(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed.strip_prefix("Bearer ").unwrap_or(trimmed).trim()
}

/// Pick the credential source for an endpoint: a configured static token
/// wins over the environment variable.
#[must_use]
pub fn credential_source(endpoint: &EndpointConfig) -> Arc<dyn CredentialSource> {
    match endpoint.api_token.as_deref() {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(EnvToken::new(endpoint.token_env.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token_strips_bearer_prefix() {
        let source = StaticToken::new("Bearer abc123");
        assert_eq!(source.token().unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_env_token_reads_current_value() {
        let var = "TURNSTREAM_TEST_ENV_TOKEN_READ";
        let source = EnvToken::new(var);
        std::env::remove_var(var);
        assert_eq!(source.token().unwrap(), None);

        std::env::set_var(var, "t-1");
        assert_eq!(source.token().unwrap().as_deref(), Some("t-1"));
        std::env::set_var(var, "  ");
        assert_eq!(source.token().unwrap(), None);
        std::env::remove_var(var);
    }

    #[test]
    fn test_static_token_takes_precedence() {
        let mut endpoint = crate::config::AppConfig::for_endpoint("http://localhost/x").endpoint;
        endpoint.api_token = Some("cfg".to_string());
        endpoint.token_env = "TURNSTREAM_TEST_ENV_TOKEN_UNUSED".to_string();
        let source = credential_source(&endpoint);
        assert_eq!(source.token().unwrap().as_deref(), Some("cfg"));
    }
}
