//! Configuration management
//!
//! This module handles loading and parsing configuration for Stagepass.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::routes::RouteClassifier;
use crate::models::RouteCategory;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Edge server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Built frontend to serve
    #[serde(default)]
    pub site: SiteConfig,
    /// Route protection rules
    #[serde(default)]
    pub routes: RouteRules,
    /// Redirect targets
    #[serde(default)]
    pub redirects: RedirectPaths,
    /// Token and session settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Remote backend API
    #[serde(default)]
    pub api: ApiConfig,
    /// Remote log shipping
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Static site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Directory holding the built frontend (index.html at its root)
    #[serde(default = "default_site_dir")]
    pub dir: PathBuf,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            dir: default_site_dir(),
        }
    }
}

fn default_site_dir() -> PathBuf {
    PathBuf::from("dist")
}

/// Route protection rules.
///
/// Patterns may contain `*`, which matches any run of characters.
/// - `protected`: plain patterns match by prefix
/// - `auth`: exact paths only
/// - `public`: plain patterns match exactly
/// - `bypass`: never inspected by the edge guard (assets, API proxies)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRules {
    #[serde(default = "default_protected_routes")]
    pub protected: Vec<String>,
    #[serde(default = "default_auth_routes")]
    pub auth: Vec<String>,
    #[serde(default = "default_public_routes")]
    pub public: Vec<String>,
    #[serde(default = "default_bypass_routes")]
    pub bypass: Vec<String>,
}

impl Default for RouteRules {
    fn default() -> Self {
        Self {
            protected: default_protected_routes(),
            auth: default_auth_routes(),
            public: default_public_routes(),
            bypass: default_bypass_routes(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_protected_routes() -> Vec<String> {
    strings(&["/dashboard*", "/profile*", "/wallet*"])
}

fn default_auth_routes() -> Vec<String> {
    strings(&["/login", "/signup", "/verify-otp"])
}

fn default_public_routes() -> Vec<String> {
    strings(&[
        "/",
        "/events",
        "/events/*",
        "/checkout/*",
        "/blog",
        "/blog/*",
        "/about",
        "/contact",
        "/accept-invite*",
        "/unauthorized",
    ])
}

fn default_bypass_routes() -> Vec<String> {
    strings(&["/_next/*", "/assets/*", "/static/*", "/api/*", "/favicon.ico", "/robots.txt", "/healthz"])
}

/// Symbolic redirect targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectPaths {
    #[serde(default = "default_login_path")]
    pub login: String,
    #[serde(default = "default_dashboard_path")]
    pub dashboard: String,
    #[serde(default = "default_unauthorized_path")]
    pub unauthorized: String,
}

impl Default for RedirectPaths {
    fn default() -> Self {
        Self {
            login: default_login_path(),
            dashboard: default_dashboard_path(),
            unauthorized: default_unauthorized_path(),
        }
    }
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_dashboard_path() -> String {
    "/dashboard".to_string()
}

fn default_unauthorized_path() -> String {
    "/unauthorized".to_string()
}

/// Token and session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// How long a token validity answer is trusted
    #[serde(default = "default_token_cache_ttl")]
    pub token_cache_ttl_seconds: u64,
    /// Cookie carrying the access token on page requests
    #[serde(default = "default_token_cookie")]
    pub token_cookie: String,
    /// File used to persist the token pair between runs
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Upper bound for a guard waiting on session/role resolution
    #[serde(default = "default_guard_timeout_ms")]
    pub guard_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_cache_ttl_seconds: default_token_cache_ttl(),
            token_cookie: default_token_cookie(),
            storage_path: default_storage_path(),
            guard_timeout_ms: default_guard_timeout_ms(),
        }
    }
}

impl AuthConfig {
    pub fn token_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.token_cache_ttl_seconds)
    }

    pub fn guard_timeout(&self) -> Duration {
        Duration::from_millis(self.guard_timeout_ms)
    }
}

fn default_token_cache_ttl() -> u64 {
    60
}

fn default_token_cookie() -> String {
    "access_token".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/session.json")
}

fn default_guard_timeout_ms() -> u64 {
    10_000
}

/// Remote backend API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://api.example.com/api`
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_seconds: default_api_timeout(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_api_timeout() -> u64 {
    15
}

/// Remote log shipping configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log endpoint; shipping is disabled when absent
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - STAGEPASS_SERVER_HOST
    /// - STAGEPASS_SERVER_PORT
    /// - STAGEPASS_SITE_DIR
    /// - STAGEPASS_AUTH_TOKEN_CACHE_TTL_SECONDS
    /// - STAGEPASS_AUTH_TOKEN_COOKIE
    /// - STAGEPASS_AUTH_STORAGE_PATH
    /// - STAGEPASS_AUTH_GUARD_TIMEOUT_MS
    /// - STAGEPASS_API_BASE_URL
    /// - STAGEPASS_API_TIMEOUT_SECONDS
    /// - STAGEPASS_LOGGING_ENDPOINT
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("STAGEPASS_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("STAGEPASS_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(dir) = std::env::var("STAGEPASS_SITE_DIR") {
            self.site.dir = PathBuf::from(dir);
        }

        if let Ok(ttl) = std::env::var("STAGEPASS_AUTH_TOKEN_CACHE_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.auth.token_cache_ttl_seconds = ttl;
            }
        }
        if let Ok(cookie) = std::env::var("STAGEPASS_AUTH_TOKEN_COOKIE") {
            self.auth.token_cookie = cookie;
        }
        if let Ok(path) = std::env::var("STAGEPASS_AUTH_STORAGE_PATH") {
            self.auth.storage_path = PathBuf::from(path);
        }
        if let Ok(timeout) = std::env::var("STAGEPASS_AUTH_GUARD_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.auth.guard_timeout_ms = timeout;
            }
        }

        if let Ok(url) = std::env::var("STAGEPASS_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Ok(timeout) = std::env::var("STAGEPASS_API_TIMEOUT_SECONDS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.api.timeout_seconds = timeout;
            }
        }

        if let Ok(endpoint) = std::env::var("STAGEPASS_LOGGING_ENDPOINT") {
            self.logging.endpoint = if endpoint.trim().is_empty() {
                None
            } else {
                Some(endpoint)
            };
        }
    }

    /// Reject configurations that would make the edge guard redirect forever.
    ///
    /// The login and unauthorized pages are redirect targets for anonymous
    /// visitors, so both must classify as Auth or Public.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token_cache_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "auth.token_cache_ttl_seconds must be greater than zero".to_string(),
            ));
        }

        let classifier = RouteClassifier::new(&self.routes, &self.redirects)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        match classifier.classify(&self.redirects.login) {
            RouteCategory::Public | RouteCategory::Auth => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "login path '{}' must be an auth or public page, found {}",
                    self.redirects.login, other
                )))
            }
        }

        match classifier.classify(&self.redirects.unauthorized) {
            RouteCategory::Public | RouteCategory::Auth => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unauthorized path '{}' must be public, found {}",
                    self.redirects.unauthorized, other
                )))
            }
        }

        Ok(())
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "STAGEPASS_SERVER_HOST",
    "STAGEPASS_SERVER_PORT",
    "STAGEPASS_SITE_DIR",
    "STAGEPASS_AUTH_TOKEN_CACHE_TTL_SECONDS",
    "STAGEPASS_AUTH_TOKEN_COOKIE",
    "STAGEPASS_AUTH_STORAGE_PATH",
    "STAGEPASS_AUTH_GUARD_TIMEOUT_MS",
    "STAGEPASS_API_BASE_URL",
    "STAGEPASS_API_TIMEOUT_SECONDS",
    "STAGEPASS_LOGGING_ENDPOINT",
];

#[cfg(test)]
fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}
