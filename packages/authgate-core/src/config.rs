use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::guard::GuardConfig;
use crate::session::{Identity, SessionConfig};

/// Default account service URL
const DEFAULT_API_URL: &str = "http://localhost:8080/api";

/// Environment variable name for API URL override
const ENV_API_URL: &str = "AUTHGATE_API_URL";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    service: Option<ServiceSection>,
    routes: Option<RoutesSection>,
    session: Option<SessionSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceSection {
    /// Account service endpoint (e.g., "https://office.example.com/api")
    api_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RoutesSection {
    login_path: Option<String>,
    continue_param: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionSection {
    allow_skip: Option<bool>,
    fallback_name: Option<String>,
    fallback_email: Option<String>,
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct AuthgateConfig {
    /// Base URL for account service calls
    pub api_url: String,
    pub guard: GuardConfig,
    pub session: SessionConfig,
    /// Source of the API URL (for logging)
    pub source: ConfigSource,
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Get the path to the configuration file
pub fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("authgate").join("config.toml"))
}

/// Load configuration from the config file
fn load_config_file(path: &Path) -> Option<ConfigFile> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Combine the config file and environment override with defaults.
fn resolve(file: ConfigFile, env_url: Option<String>) -> AuthgateConfig {
    let env_url = non_empty(env_url).map(|u| u.trim_end_matches('/').to_string());
    let file_url = non_empty(file.service.and_then(|s| s.api_url))
        .map(|u| u.trim_end_matches('/').to_string());

    // Priority: environment, config file, default
    let (api_url, source) = match (env_url, file_url) {
        (Some(url), _) => {
            tracing::info!("Using API URL from environment variable: {}", url);
            (url, ConfigSource::Environment)
        }
        (None, Some(url)) => {
            tracing::info!("Using API URL from config file: {}", url);
            (url, ConfigSource::ConfigFile)
        }
        (None, None) => {
            tracing::debug!("Using default API URL: {}", DEFAULT_API_URL);
            (DEFAULT_API_URL.to_string(), ConfigSource::Default)
        }
    };

    let mut guard = GuardConfig::default();
    if let Some(routes) = file.routes {
        if let Some(path) = non_empty(routes.login_path) {
            guard.login_path = path;
        }
        if let Some(param) = non_empty(routes.continue_param) {
            guard.continue_param = param;
        }
    }

    let mut session = SessionConfig::default();
    if let Some(section) = file.session {
        if let Some(allow) = section.allow_skip {
            session.allow_skip = allow;
        }
        let name = non_empty(section.fallback_name);
        let email = non_empty(section.fallback_email);
        if name.is_some() || email.is_some() {
            let fallback = Identity::fallback_admin();
            session.fallback_identity = Identity {
                name: name.unwrap_or(fallback.name),
                email: email.unwrap_or(fallback.email),
                ..fallback
            };
        }
    }

    AuthgateConfig {
        api_url,
        guard,
        session,
        source,
    }
}

/// Load configuration from `path` with priority:
/// 1. Environment variable (AUTHGATE_API_URL) for the API URL
/// 2. Config file
/// 3. Default values
pub fn load_config_from(path: Option<&Path>) -> AuthgateConfig {
    let file = path.and_then(load_config_file).unwrap_or_default();
    resolve(file, std::env::var(ENV_API_URL).ok())
}

/// Load configuration from the default location (~/.config/authgate/config.toml).
pub fn load_config() -> AuthgateConfig {
    load_config_from(get_config_file_path().as_deref())
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/authgate/config.toml".to_string())
}

/// Name of the environment variable that overrides the API URL.
pub fn api_url_env_var() -> &'static str {
    ENV_API_URL
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# authgate configuration
# Place this file at: ~/.config/authgate/config.toml

[service]
# Account service endpoint
# Default: http://localhost:8080/api
# api_url = "https://office.example.com/api"

[routes]
# Login entry point used by the route guard
# login_path = "/auth/login"
# Query parameter carrying the original destination
# continue_param = "continueUrl"

[session]
# Allow the credential-free guest sign-in (debug builds only by default)
# allow_skip = false
# Identity restored when only the continuity flag survived
# fallback_name = "admin"
# fallback_email = "admin@anbtech.co.kr"
"#
    .to_string()
}
