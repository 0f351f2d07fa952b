use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const ENV_ENDPOINT_URL: &str = "LAMBDAPOOL_ENDPOINT_URL";
pub const ENV_READ_TIMEOUT_SECS: &str = "LAMBDAPOOL_READ_TIMEOUT_SECS";

/// Static credentials. When absent from a context the ambient provider chain is used.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

/// Endpoint, credential and timeout parameters shared by every invocation
/// against one deployed function.
///
/// A context is immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    target: String,
    credentials: Option<Credentials>,
    region: Option<String>,
    endpoint_url: Option<String>,
    read_timeout: Duration,
}

impl ConnectionContext {
    pub fn new(target: impl Into<String>) -> Result<Self, ConfigError> {
        Self::builder(target).build()
    }

    pub fn builder(target: impl Into<String>) -> ConnectionContextBuilder {
        ConnectionContextBuilder {
            target: target.into(),
            credentials: None,
            region: None,
            endpoint_url: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Builds a context for `target` from the process environment.
    pub fn from_env(target: impl Into<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(target, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        target: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut builder = Self::builder(target);

        if let Some(region) = non_empty(ENV_REGION).or_else(|| non_empty(ENV_DEFAULT_REGION)) {
            builder = builder.region(region);
        }

        if let (Some(key_id), Some(secret)) = (
            non_empty(ENV_ACCESS_KEY_ID),
            non_empty(ENV_SECRET_ACCESS_KEY),
        ) {
            let mut credentials = Credentials::new(key_id, secret);
            if let Some(token) = non_empty(ENV_SESSION_TOKEN) {
                credentials = credentials.with_session_token(token);
            }
            builder = builder.credentials(credentials);
        }

        if let Some(url) = non_empty(ENV_ENDPOINT_URL) {
            builder = builder.endpoint_url(url);
        }

        if let Some(raw) = non_empty(ENV_READ_TIMEOUT_SECS) {
            let seconds = raw
                .trim()
                .parse::<u64>()
                .map_err(|error| ConfigError::InvalidSetting {
                    name: ENV_READ_TIMEOUT_SECS.to_string(),
                    reason: error.to_string(),
                })?;
            builder = builder.read_timeout(Duration::from_secs(seconds));
        }

        builder.build()
    }

    /// Name or ARN of the deployed function every call is addressed to.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionContextBuilder {
    target: String,
    credentials: Option<Credentials>,
    region: Option<String>,
    endpoint_url: Option<String>,
    read_timeout: Duration,
}

impl ConnectionContextBuilder {
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ConnectionContext, ConfigError> {
        let target = self.target.trim().to_string();
        if target.is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroReadTimeout);
        }

        Ok(ConnectionContext {
            target,
            credentials: self.credentials,
            region: self.region,
            endpoint_url: self.endpoint_url,
            read_timeout: self.read_timeout,
        })
    }
}
