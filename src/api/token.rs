use crate::config::{Config, ACCESS_TOKEN_ENV};
use crate::error::TransportError;
use secrecy::{ExposeSecret, SecretString};

/// Supplies the bearer token for API requests.
///
/// Injected into the HTTP adapters instead of living in process-wide state.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Result<SecretString, TransportError>;
}

/// A fixed token.
pub struct StaticToken {
    token: SecretString,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Result<SecretString, TransportError> {
        Ok(SecretString::from(self.token.expose_secret().to_owned()))
    }
}

/// Reads an environment variable on every request, falling back to a
/// configured token when the variable is unset or blank.
pub struct EnvToken {
    var: String,
    fallback: Option<SecretString>,
}

impl EnvToken {
    pub fn new(var: impl Into<String>, fallback: Option<String>) -> Self {
        Self {
            var: var.into(),
            fallback: fallback.map(SecretString::from),
        }
    }

    /// `UNSPLASH_ACCESS_TOKEN`, then `access_token` from the config file.
    pub fn from_config(config: &Config) -> Self {
        Self::new(ACCESS_TOKEN_ENV, config.access_token.clone())
    }
}

impl TokenProvider for EnvToken {
    fn access_token(&self) -> Result<SecretString, TransportError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(SecretString::from(token)),
            _ => self
                .fallback
                .as_ref()
                .map(|token| SecretString::from(token.expose_secret().to_owned()))
                .ok_or(TransportError::MissingToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token() {
        let provider = StaticToken::new("abc");
        assert_eq!(provider.access_token().unwrap().expose_secret(), "abc");
    }

    #[test]
    fn test_env_token_falls_back_to_config_value() {
        let provider = EnvToken::new("PHOTOFEED_TEST_TOKEN_UNSET", Some("from-file".into()));
        assert_eq!(provider.access_token().unwrap().expose_secret(), "from-file");
    }

    #[test]
    fn test_env_token_missing() {
        let provider = EnvToken::new("PHOTOFEED_TEST_TOKEN_UNSET", None);
        assert!(matches!(
            provider.access_token(),
            Err(TransportError::MissingToken)
        ));
    }
}
