//! Configuration types for the IP reputation aggregator.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// Primary provider: geolocation and privacy detection.
    #[serde(default)]
    pub ipinfo: ProviderConfig,

    /// Secondary provider: proxy/VPN/Tor detection, usable without a key.
    #[serde(default)]
    pub proxycheck: ProviderConfig,

    /// Tertiary provider: fallback geolocation.
    #[serde(default)]
    pub ip2location: ProviderConfig,

    /// HTTP route layer.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Per-call provider timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// User-Agent sent to providers.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout() -> u64 {
    5000
}

fn default_user_agent() -> String {
    format!("ip-reputation-aggregator/{}", env!("CARGO_PKG_VERSION"))
}

/// Configuration for one provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Enable this provider.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API keys, used round-robin in the listed order.
    ///
    /// Entries support `${ENV_VAR}` syntax and may hold several
    /// comma-separated keys.
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Override the provider's API endpoint.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Override the global timeout for this provider.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_keys: Vec::new(),
            base_url: None,
            timeout_ms: None,
        }
    }
}

impl ProviderConfig {
    /// Configured credentials in order, with blanks removed.
    ///
    /// An unset `${VAR}` expands to nothing, so it simply contributes no key.
    pub fn credentials(&self) -> Vec<String> {
        self.api_keys
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Effective endpoint for this provider.
    pub fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url.as_deref().unwrap_or(default)
    }

    /// Effective per-call timeout.
    pub fn timeout(&self, settings: &Settings) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(settings.timeout_ms))
    }
}

/// HTTP route layer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` references.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.settings.timeout_ms == 0 {
            anyhow::bail!("settings.timeout_ms must be greater than zero");
        }

        for (name, provider) in self.providers() {
            if provider.timeout_ms == Some(0) {
                anyhow::bail!("{}.timeout_ms must be greater than zero", name);
            }

            if let Some(ref url) = provider.base_url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    anyhow::bail!("{}.base_url must be an http(s) URL: {}", name, url);
                }
            }
        }

        self.listen_addr()?;

        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid server.listen '{}': {}", self.server.listen, e))
    }

    /// Provider sections in pipeline order.
    pub fn providers(&self) -> [(&'static str, &ProviderConfig); 3] {
        [
            ("ipinfo", &self.ipinfo),
            ("proxycheck", &self.proxycheck),
            ("ip2location", &self.ip2location),
        ]
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# IP Reputation Aggregator Configuration

settings:
  timeout_ms: 5000             # Per provider call

# Primary: geolocation + VPN/proxy/Tor/hosting detection
ipinfo:
  enabled: true
  api_keys:                    # Rotated round-robin, in this order
    - "${IPINFO_TOKEN}"
    - "${IPINFO_TOKEN_2}"

# Secondary: proxy specialist, queried anonymously when no key is set
proxycheck:
  enabled: true
  api_keys:
    - "${PROXYCHECK_KEYS}"     # Comma-separated lists are accepted

# Tertiary: only used when country or ISP is still unknown
ip2location:
  enabled: true
  api_keys:
    - "${IP2LOCATION_KEY}"
  timeout_ms: 3000

server:
  listen: "127.0.0.1:8080"
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern is valid");

    re.replace_all(content, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
