//! IPInfo provider: geolocation plus privacy detection.

use super::{
    clamp_score, ensure_success, http_client, lenient_bool, non_empty, Lookup, ProviderError,
    SignalBuilder,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://ipinfo.io";

pub const VPN_WEIGHT: i64 = 25;
pub const PROXY_WEIGHT: i64 = 25;
pub const TOR_WEIGHT: i64 = 30;
pub const HOSTING_WEIGHT: i64 = 20;

/// IPInfo `/json` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpInfoRecord {
    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// ISO country code.
    #[serde(default)]
    pub country: Option<String>,

    /// "lat,lon" string.
    #[serde(default)]
    pub loc: Option<String>,

    /// AS number and operator, e.g. "AS15169 Google LLC".
    #[serde(default)]
    pub org: Option<String>,

    /// Only present on plans with privacy detection.
    #[serde(default)]
    pub privacy: Option<IpInfoPrivacy>,
}

/// IPInfo privacy detection flags.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct IpInfoPrivacy {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub vpn: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub proxy: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub tor: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub hosting: bool,
}

/// Weighted risk score for the detected privacy signals, clamped to 0-100.
pub fn privacy_score(privacy: &IpInfoPrivacy) -> u8 {
    let weights = [
        (privacy.vpn, VPN_WEIGHT),
        (privacy.proxy, PROXY_WEIGHT),
        (privacy.tor, TOR_WEIGHT),
        (privacy.hosting, HOSTING_WEIGHT),
    ];
    let raw = weights
        .iter()
        .filter(|(detected, _)| *detected)
        .map(|(_, weight)| weight)
        .sum::<i64>();
    clamp_score(raw)
}

/// Split a "lat,lon" string. Anything malformed yields `(None, None)`.
pub fn parse_location(loc: Option<&str>) -> (Option<f64>, Option<f64>) {
    let parsed = loc.and_then(|loc| {
        let (lat, lon) = loc.split_once(',')?;
        let lat = lat.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        let lon = lon.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        Some((lat, lon))
    });

    match parsed {
        Some((lat, lon)) => (Some(lat), Some(lon)),
        None => (None, None),
    }
}

/// Build the first-stage signal from an IPInfo record.
pub fn signal_from(provider: &str, record: IpInfoRecord) -> SignalBuilder {
    let privacy = record.privacy.unwrap_or_default();
    let (latitude, longitude) = parse_location(record.loc.as_deref());
    let org = non_empty(record.org);

    SignalBuilder {
        fraud_score: privacy_score(&privacy),
        vpn: privacy.vpn,
        proxy: privacy.proxy,
        tor: privacy.tor,
        country_code: non_empty(record.country),
        region: non_empty(record.region),
        city: non_empty(record.city),
        latitude,
        longitude,
        isp: org.clone(),
        organization: org,
        ..SignalBuilder::new(provider)
    }
}

/// HTTP client for the IPInfo API.
pub struct IpInfoClient {
    base_url: String,
    client: Client,
}

impl IpInfoClient {
    /// Create a new IPInfo client.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http_client(timeout, user_agent)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct IpInfoEnvelope {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(flatten)]
    record: IpInfoRecord,
}

#[async_trait]
impl Lookup for IpInfoClient {
    type Record = IpInfoRecord;

    fn name(&self) -> &str {
        "ipinfo"
    }

    async fn lookup(
        &self,
        ip: &str,
        credential: Option<&str>,
    ) -> Result<IpInfoRecord, ProviderError> {
        let url = format!("{}/{}/json", self.base_url, ip);
        let mut request = self.client.get(&url).header("Accept", "application/json");
        if let Some(token) = credential {
            request = request.query(&[("token", token)]);
        }

        debug!(ip = %ip, "Querying IPInfo");

        let response = ensure_success(request.send().await?).await?;
        let envelope: IpInfoEnvelope = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        if let Some(error) = envelope.error {
            return Err(ProviderError::InvalidResponse(error.to_string()));
        }

        Ok(envelope.record)
    }
}
