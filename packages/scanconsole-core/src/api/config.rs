use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default API URL (local backend)
const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Environment variable name for API URL override
const ENV_API_URL: &str = "SCANCONSOLE_API_URL";

/// Environment variable name for the API bearer token
const ENV_API_TOKEN: &str = "SCANCONSOLE_API_TOKEN";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    api: Option<ApiSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiSection {
    /// API endpoint URL (e.g., "https://console.example.com/api")
    url: Option<String>,
    /// Bearer token sent with every request
    token: Option<String>,
    poll_interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// Runtime console configuration
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Base URL for API calls (e.g., "http://localhost:8000/api")
    pub api_url: String,
    pub api_token: Option<String>,
    /// How often the active scan is polled
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Source of the API URL (for display)
    pub source: ConfigSource,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            source: ConfigSource::Default,
        }
    }
}

impl ConsoleConfig {
    /// Override the API URL (e.g. from a command line flag).
    pub fn with_api_url(mut self, url: &str) -> Self {
        let url = clean_url(url);
        if !url.is_empty() {
            self.api_url = url;
            self.source = ConfigSource::CommandLine;
        }
        self
    }
}

/// Where the API URL came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
    /// Passed on the command line
    CommandLine,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
            ConfigSource::CommandLine => write!(f, "command line"),
        }
    }
}

fn clean_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("scanconsole").join("config.toml"))
}

/// Load configuration from the config file
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
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

fn parse_config(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

/// Build the runtime config from an (optional) file section and environment values.
fn resolve(
    file: Option<ConfigFile>,
    env_url: Option<String>,
    env_token: Option<String>,
) -> ConsoleConfig {
    let mut config = ConsoleConfig::default();
    let section = file.and_then(|f| f.api).unwrap_or_default();

    if let Some(secs) = section.poll_interval_secs.filter(|s| *s > 0) {
        config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = section.request_timeout_secs.filter(|s| *s > 0) {
        config.request_timeout = Duration::from_secs(secs);
    }
    config.api_token = section
        .token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    // Environment variable first, then config file
    if let Some(url) = env_url.map(|u| clean_url(&u)).filter(|u| !u.is_empty()) {
        tracing::info!("Using API URL from environment variable: {}", url);
        config.api_url = url;
        config.source = ConfigSource::Environment;
    } else if let Some(url) = section.url.map(|u| clean_url(&u)).filter(|u| !u.is_empty()) {
        tracing::info!("Using API URL from config file: {}", url);
        config.api_url = url;
        config.source = ConfigSource::ConfigFile;
    } else {
        tracing::debug!("Using default API URL: {}", DEFAULT_API_URL);
    }

    if let Some(token) = env_token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        config.api_token = Some(token);
    }

    config
}

/// Load console configuration with priority:
/// 1. Environment variables (SCANCONSOLE_API_URL, SCANCONSOLE_API_TOKEN)
/// 2. Config file (~/.config/scanconsole/config.toml)
/// 3. Default values
pub fn load_console_config() -> ConsoleConfig {
    resolve(
        load_config_file(),
        std::env::var(ENV_API_URL).ok(),
        std::env::var(ENV_API_TOKEN).ok(),
    )
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/scanconsole/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# Scan Console Configuration
# Place this file at: ~/.config/scanconsole/config.toml

[api]
# Base URL of the discovery platform API
# Default: http://localhost:8000/api
# url = "https://discovery.example.com/api"

# Bearer token sent with every request (or set SCANCONSOLE_API_TOKEN)
# token = "..."

# How often the active scan is polled, in seconds
# poll_interval_secs = 2

# Per-request timeout, in seconds
# request_timeout_secs = 10
"#
    .to_string()
}
