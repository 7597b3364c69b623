//! IP reputation providers.

pub mod ip2location;
pub mod ipinfo;
pub mod proxycheck;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Score assigned when a provider flags a proxy without scoring it.
pub const FLAGGED_PROXY_SCORE: u8 = 75;

/// Upper bound of every risk score.
pub const MAX_SCORE: u8 = 100;

/// Reconciled reputation for one IP.
///
/// Produced once per lookup by [`SignalBuilder::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpReputation {
    /// Risk estimate (0-100, higher = worse).
    pub fraud_score: u8,
    pub vpn: bool,
    pub proxy: bool,
    pub tor: bool,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub isp: Option<String>,
    pub organization: Option<String>,
    /// Providers that contributed, in pipeline order.
    pub sources: Vec<String>,
}

/// Mutable signal accumulated across provider stages.
///
/// Every field is declared up front: unknown values stay `None`/`false`/`0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalBuilder {
    pub fraud_score: u8,
    pub vpn: bool,
    pub proxy: bool,
    pub tor: bool,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub isp: Option<String>,
    pub organization: Option<String>,
    pub sources: Vec<String>,
}

impl SignalBuilder {
    /// Start an empty signal attributed to `provider`.
    pub fn new(provider: &str) -> Self {
        Self {
            sources: vec![provider.to_string()],
            ..Self::default()
        }
    }

    /// Record that `provider` contributed to this signal.
    pub fn add_source(&mut self, provider: &str) {
        if !self.sources.iter().any(|s| s == provider) {
            self.sources.push(provider.to_string());
        }
    }

    /// Raise the score to at least `floor`. Never lowers it.
    pub fn raise_score(&mut self, floor: u8) {
        self.fraud_score = self.fraud_score.max(floor.min(MAX_SCORE));
    }

    /// Freeze the signal into the caller-facing result.
    pub fn build(self) -> IpReputation {
        IpReputation {
            fraud_score: self.fraud_score.min(MAX_SCORE),
            vpn: self.vpn,
            proxy: self.proxy,
            tor: self.tor,
            country_code: self.country_code,
            region: self.region,
            city: self.city,
            latitude: self.latitude,
            longitude: self.longitude,
            isp: self.isp,
            organization: self.organization,
            sources: self.sources,
        }
    }
}

/// Whether the fallback geolocation stage should run.
///
/// True when nothing was found yet, or the country or ISP is still unknown.
pub fn needs_fallback(signal: Option<&SignalBuilder>) -> bool {
    match signal {
        None => true,
        Some(s) => s.country_code.is_none() || s.isp.is_none(),
    }
}

/// Clamp an arbitrary integer into the score range.
pub fn clamp_score(raw: i64) -> u8 {
    raw.clamp(0, i64::from(MAX_SCORE)) as u8
}

/// Set `slot` from `value` only when `slot` is still empty.
pub(crate) fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Treat blank strings from providers as missing.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accept an integer given as a JSON number or a numeric string.
pub(crate) fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }))
}

/// Accept a flag given as a boolean, "yes"/"no", "true"/"false" or 0/1.
///
/// `null` and anything unrecognised read as `false`.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("true") || s == "1"
        }
        Some(serde_json::Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    })
}

/// Accept a float given as a JSON number or a numeric string.
pub(crate) fn lenient_float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
    .filter(|f| f.is_finite()))
}

/// Error from a reputation provider.
#[derive(Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    Http(reqwest::Error),
    /// Timeout.
    Timeout,
    /// Rate limited.
    RateLimited,
    /// Credential rejected or exhausted.
    Denied(String),
    /// Invalid response.
    InvalidResponse(String),
    /// Other error.
    Other(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {}", e),
            ProviderError::Timeout => write!(f, "Request timed out"),
            ProviderError::RateLimited => write!(f, "Rate limited"),
            ProviderError::Denied(msg) => write!(f, "Denied: {}", msg),
            ProviderError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            ProviderError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProviderError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e)
        }
    }
}

/// A single provider endpoint: one IP in, one typed record out.
///
/// Implementations parse the provider's JSON into `Record` and turn every
/// unusable answer into a [`ProviderError`]. Merge policy lives elsewhere.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// Typed response record.
    type Record: Send;

    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Look up `ip`, authenticating with `credential` when one is given.
    async fn lookup(
        &self,
        ip: &str,
        credential: Option<&str>,
    ) -> Result<Self::Record, ProviderError>;
}

/// Build the HTTP client shared by a provider's lookups.
pub(crate) fn http_client(timeout: Duration, user_agent: &str) -> Result<Client, ProviderError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()?)
}

/// Map rate-limit, auth and other non-2xx statuses to provider errors.
pub(crate) async fn ensure_success(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProviderError::Denied(format!("HTTP {}", status)));
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::InvalidResponse(format!("HTTP {}: {}", status, body)))
}
