//! Runtime configuration loaded from environment variables.
//!
//! Everything except the API key has a default, so the binary starts with
//! zero configuration against the in-memory store.

pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-4.0-generate-001";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key. Its absence is reported per request, not at startup.
    /// Env: `API_KEY`
    pub api_key: Option<String>,

    /// Env: `GEMINI_TEXT_MODEL`
    pub text_model: String,

    /// Env: `GEMINI_IMAGE_MODEL`
    pub image_model: String,

    /// Base URL for the Gemini REST API (image generation).
    /// Env: `GEMINI_API_BASE_URL`
    pub gemini_base_url: String,

    /// Postgres connection string; the in-memory store is used when unset.
    /// Env: `DATABASE_URL`
    pub database_url: Option<String>,

    /// Base URL of a running `genlux serve` proxy for the chat front end.
    /// Env: `GENLUX_PROXY_URL`
    pub proxy_url: Option<String>,

    /// Env: `PORT`
    /// Default: `8080`
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            database_url: None,
            proxy_url: None,
            port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        config.api_key = var("API_KEY");
        config.database_url = var("DATABASE_URL");
        config.proxy_url = var("GENLUX_PROXY_URL");

        if let Some(model) = var("GEMINI_TEXT_MODEL") {
            config.text_model = model;
        }
        if let Some(model) = var("GEMINI_IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Some(url) = var("GEMINI_API_BASE_URL") {
            config.gemini_base_url = url;
        }

        if let Some(port) = var("PORT") {
            match port.parse() {
                Ok(p) => config.port = p,
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let config = Config::from_lookup(lookup(&[]));
        assert!(config.api_key.is_none());
        assert_eq!(config.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(config.image_model, DEFAULT_IMAGE_MODEL);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config = Config::from_lookup(lookup(&[("API_KEY", "   ")]));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn invalid_port_falls_back() {
        let config = Config::from_lookup(lookup(&[("PORT", "eighty"), ("DATABASE_URL", "postgres://x")]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url.as_deref(), Some("postgres://x"));
    }
}
