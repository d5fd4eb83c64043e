//! Provider configuration.

use std::time::Duration;

use crate::error::{LlmError, Result};

/// Connection settings for one provider adapter.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    ///
    /// Examples:
    /// - Anthropic: "https://api.anthropic.com"
    /// - OpenAI: "https://api.openai.com/v1"
    /// - Gemini: "https://generativelanguage.googleapis.com/v1beta"
    pub base_url: String,

    /// Request timeout for the underlying transport.
    pub timeout: Duration,

    /// Organization ID (optional, for providers that support it).
    pub organization: Option<String>,

    /// Project ID (optional, for providers that support it).
    pub project: Option<String>,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: default_timeout(),
            organization: None,
            project: None,
        }
    }

    /// Read the key from `key_var`; an optional override of the base URL
    /// is read from `base_url_var`.
    pub fn from_env(key_var: &str, base_url_var: &str, default_base_url: &str) -> Result<Self> {
        let api_key = std::env::var(key_var).map_err(|_| {
            LlmError::Configuration(format!("environment variable {key_var} not set"))
        })?;
        let base_url =
            std::env::var(base_url_var).unwrap_or_else(|_| default_base_url.to_string());
        Ok(Self::new(api_key, base_url))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chains() {
        let config = ProviderConfig::new("key", "https://api.example.com")
            .with_timeout(Duration::from_secs(30))
            .with_organization("org-1")
            .with_project("proj-1");
        assert_eq!(config.api_key, "key");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.organization.as_deref(), Some("org-1"));
        assert_eq!(config.project.as_deref(), Some("proj-1"));
    }
}
