//! Configuration parsing and validation for chatrelay.
//!
//! Values come from an optional TOML file. Secrets and the provider URL may
//! reference environment variables as `${VAR}`; anything the file leaves
//! unset falls back to the conventional environment variables the relay has
//! always honoured (`AUTH_SECRET_KEY`, `OPENAI_API_KEY`, ...).

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub provider: ProviderConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:3003")
    pub listen: String,
    /// Directory of static front-end assets
    pub public_dir: String,
    /// Directory receiving `/prepare-data` uploads
    pub upload_dir: String,
    /// Number of reverse-proxy hops trusted when resolving the client address
    pub trust_proxy_hops: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            public_dir: DEFAULT_PUBLIC_DIR.to_string(),
            upload_dir: DEFAULT_UPLOAD_DIR.to_string(),
            trust_proxy_hops: DEFAULT_TRUST_PROXY_HOPS,
        }
    }
}

const DEFAULT_LISTEN: &str = "0.0.0.0:3003";
const DEFAULT_PUBLIC_DIR: &str = "public";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_TRUST_PROXY_HOPS: usize = 1;

/// Shared-secret gate configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Shared secret; `None` or empty disables authentication.
    pub secret_key: Option<Secret>,
}

impl AuthConfig {
    /// The configured secret, if authentication is enabled.
    pub fn secret(&self) -> Option<&str> {
        self.secret_key
            .as_ref()
            .map(|s| s.expose_secret().trim())
            .filter(|s| !s.is_empty())
    }

    /// Whether privileged routes require a token.
    pub fn is_enabled(&self) -> bool {
        self.secret().is_some()
    }
}

/// Upstream provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible API (without the `/v1` suffix)
    pub base_url: String,
    /// Provider API key
    pub api_key: Option<Secret>,
    /// Chat model used when a request names none
    pub model: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// HTTPS proxy URL for upstream traffic
    pub https_proxy: Option<String>,
    /// SOCKS5 proxy URL for upstream traffic (takes precedence over https_proxy)
    pub socks_proxy: Option<String>,
    /// Maximum number of prior messages replayed as conversation context
    pub max_history_messages: usize,
    /// Capacity of the in-memory conversation store
    pub max_stored_messages: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            https_proxy: None,
            socks_proxy: None,
            max_history_messages: DEFAULT_MAX_HISTORY_MESSAGES,
            max_stored_messages: DEFAULT_MAX_STORED_MESSAGES,
        }
    }
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_TIMEOUT_MS: u64 = 100_000;
const DEFAULT_MAX_HISTORY_MESSAGES: usize = 20;
const DEFAULT_MAX_STORED_MESSAGES: usize = 10_000;

/// Per-client request limiting for the chat route.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window; 0 disables limiting
    pub max_requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 0,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

const DEFAULT_WINDOW_SECS: u64 = 3600;

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Secret wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()`, so every read is grep-auditable.
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Access the raw secret value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Secret(SecretString::from(s)))
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(SecretString::from(s))
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Secret(SecretString::from(s))
    }
}

/// How a secret was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Literal string in the config file (no ${} references)
    Literal,
    /// Config value contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Picked up from the conventional env var (holds var name)
    Convention(String),
    /// No value available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

/// Raw `[server]` section.
#[derive(Debug, Default, Deserialize)]
pub struct RawServerConfig {
    pub listen: Option<String>,
    pub public_dir: Option<String>,
    pub upload_dir: Option<String>,
    pub trust_proxy_hops: Option<usize>,
}

/// Raw `[auth]` section.
#[derive(Debug, Default, Deserialize)]
pub struct RawAuthConfig {
    pub secret_key: Option<String>,
}

/// Raw `[provider]` section. String values may contain `${VAR}` references.
#[derive(Debug, Default, Deserialize)]
pub struct RawProviderConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub https_proxy: Option<String>,
    pub socks_proxy: Option<String>,
    pub max_history_messages: Option<usize>,
    pub max_stored_messages: Option<usize>,
}

/// Raw `[rate_limit]` section.
#[derive(Debug, Default, Deserialize)]
pub struct RawRateLimitConfig {
    pub max_requests: Option<u32>,
    pub window_secs: Option<u64>,
}

/// Raw configuration deserialized directly from TOML, before env resolution.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub server: RawServerConfig,
    #[serde(default)]
    pub auth: RawAuthConfig,
    #[serde(default)]
    pub provider: RawProviderConfig,
    #[serde(default)]
    pub rate_limit: RawRateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple references in one string (e.g., `${SCHEME}://${HOST}`).
/// Fails on the first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in '{}')",
                var_name, field
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Resolve a secret: file value (possibly `${VAR}`), else the convention env var.
fn resolve_secret<F>(
    raw: Option<String>,
    field: &str,
    convention_var: &str,
    lookup: &F,
) -> Result<(Option<Secret>, KeySource), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match raw {
        Some(ref value) if value.contains("${") => {
            let expanded = expand_env_vars_with(value, field, lookup)?;
            Ok((Some(Secret::from(expanded)), KeySource::EnvExpanded))
        }
        Some(value) => Ok((Some(Secret::from(value)), KeySource::Literal)),
        None => match lookup(convention_var).filter(|v| !v.is_empty()) {
            Some(value) => Ok((
                Some(Secret::from(value)),
                KeySource::Convention(convention_var.to_string()),
            )),
            None => Ok((None, KeySource::None)),
        },
    }
}

/// Parse a numeric env override, rejecting garbage instead of silently ignoring it.
fn parse_env_number<T, F>(var: &str, lookup: &F) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        Some(value) => value.trim().parse::<T>().map(Some).map_err(|_| {
            ConfigError::Validation(format!("{} must be a number, got '{}'", var, value))
        }),
        None => Ok(None),
    }
}

/// Build `socks5://host:port` from the split env vars the relay accepts.
fn socks_proxy_from_env<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("SOCKS_PROXY_HOST").filter(|h| !h.is_empty())?;
    let port = lookup("SOCKS_PROXY_PORT").filter(|p| !p.is_empty())?;
    Some(format!("socks5h://{}:{}", host, port))
}

impl Config {
    /// Convert raw config to final config using real environment variables.
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        Self::from_raw_with(raw, |name| std::env::var(name).ok())
    }

    /// Convert raw config to final config with a custom env lookup.
    ///
    /// File values win; the conventional env vars only fill gaps. Returns the
    /// config together with the source of each secret.
    pub fn from_raw_with<F>(
        raw: RawConfig,
        lookup: F,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (secret_key, secret_source) = resolve_secret(
            raw.auth.secret_key,
            "auth.secret_key",
            "AUTH_SECRET_KEY",
            &lookup,
        )?;
        let (api_key, api_key_source) = resolve_secret(
            raw.provider.api_key,
            "provider.api_key",
            "OPENAI_API_KEY",
            &lookup,
        )?;

        let base_url = match raw.provider.base_url {
            Some(url) => expand_env_vars_with(&url, "provider.base_url", &lookup)?,
            None => lookup("OPENAI_API_BASE_URL")
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };

        let model = raw
            .provider
            .model
            .or_else(|| lookup("OPENAI_API_MODEL").filter(|m| !m.is_empty()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let timeout_ms = match raw.provider.timeout_ms {
            Some(ms) => ms,
            None => parse_env_number("TIMEOUT_MS", &lookup)?.unwrap_or(DEFAULT_TIMEOUT_MS),
        };

        let max_requests = match raw.rate_limit.max_requests {
            Some(n) => n,
            None => parse_env_number("MAX_REQUEST_PER_HOUR", &lookup)?.unwrap_or(0),
        };

        let provider = ProviderConfig {
            base_url,
            api_key,
            model,
            timeout_ms,
            https_proxy: raw
                .provider
                .https_proxy
                .or_else(|| lookup("HTTPS_PROXY").filter(|p| !p.is_empty())),
            socks_proxy: raw
                .provider
                .socks_proxy
                .or_else(|| socks_proxy_from_env(&lookup)),
            max_history_messages: raw
                .provider
                .max_history_messages
                .unwrap_or(DEFAULT_MAX_HISTORY_MESSAGES),
            max_stored_messages: raw
                .provider
                .max_stored_messages
                .unwrap_or(DEFAULT_MAX_STORED_MESSAGES),
        };

        let server = ServerConfig {
            listen: raw.server.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
            public_dir: raw
                .server
                .public_dir
                .unwrap_or_else(|| DEFAULT_PUBLIC_DIR.to_string()),
            upload_dir: raw
                .server
                .upload_dir
                .unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string()),
            trust_proxy_hops: raw
                .server
                .trust_proxy_hops
                .unwrap_or(DEFAULT_TRUST_PROXY_HOPS),
        };

        let config = Config {
            server,
            auth: AuthConfig { secret_key },
            provider,
            rate_limit: RateLimitConfig {
                max_requests,
                window_secs: raw.rate_limit.window_secs.unwrap_or(DEFAULT_WINDOW_SECS),
            },
            logging: raw.logging,
        };
        config.validate()?;

        let key_sources = vec![
            ("auth.secret_key".to_string(), secret_source),
            ("provider.api_key".to_string(), api_key_source),
        ];

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// A missing file is not an error: the relay then runs on defaults plus
    /// environment, which is how it is usually deployed in a container.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let path = path.as_ref();
        let raw: RawConfig = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RawConfig::default(),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        Self::from_raw(raw)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let url = self.provider.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "provider.base_url must be an http(s) URL, got '{}'",
                url
            )));
        }

        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "provider.model must not be empty".to_string(),
            ));
        }

        if self.rate_limit.max_requests > 0 && self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.window_secs must be positive when rate limiting is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
