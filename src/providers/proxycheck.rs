//! ProxyCheck provider: VPN/proxy/Tor specialist.
//!
//! Works without a key at a reduced quota, so the aggregator always makes at
//! least one attempt even when no credential is configured.

use super::{
    clamp_score, ensure_success, http_client, lenient_bool, lenient_float, lenient_int, non_empty,
    Lookup, ProviderError, SignalBuilder, FLAGGED_PROXY_SCORE,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://proxycheck.io";

/// Per-IP record from a ProxyCheck v2 response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyCheckRecord {
    /// "yes" / "no".
    #[serde(default, deserialize_with = "lenient_bool")]
    pub proxy: bool,

    /// Proxy type, e.g. "VPN", "TOR", "SOCKS5".
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    /// Native risk score, sent as a string or a number.
    #[serde(default, deserialize_with = "lenient_int")]
    pub risk: Option<i64>,

    #[serde(default)]
    pub isocode: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default, deserialize_with = "lenient_float")]
    pub latitude: Option<f64>,

    #[serde(default, deserialize_with = "lenient_float")]
    pub longitude: Option<f64>,

    /// Network operator.
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub organisation: Option<String>,
}

impl ProxyCheckRecord {
    fn is_kind(&self, kind: &str) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|k| k.trim().eq_ignore_ascii_case(kind))
    }

    /// Flagged as a proxy of type VPN.
    pub fn is_vpn(&self) -> bool {
        self.proxy && self.is_kind("VPN")
    }

    /// Typed as a Tor node.
    pub fn is_tor(&self) -> bool {
        self.is_kind("TOR")
    }
}

/// Extract the record for `ip` from a raw ProxyCheck response body.
///
/// Only `status: "ok"` with a record present is usable; `"denied"` maps to
/// [`ProviderError::Denied`] and every other shape to
/// [`ProviderError::InvalidResponse`].
pub fn parse_response(ip: &str, body: Value) -> Result<ProxyCheckRecord, ProviderError> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(status)
        .to_string();

    match status {
        "ok" => {}
        "denied" => return Err(ProviderError::Denied(message)),
        "" => return Err(ProviderError::InvalidResponse("missing status field".to_string())),
        other => {
            return Err(ProviderError::InvalidResponse(format!(
                "status {}: {}",
                other, message
            )))
        }
    }

    // The record is keyed by the queried address; IPv6 keys may come back
    // normalized, so fall back to the single object-valued entry. Several
    // candidates are ambiguous and rejected.
    let record = match body.get(ip) {
        Some(record) if record.is_object() => record.clone(),
        _ => {
            let mut candidates = body
                .as_object()
                .into_iter()
                .flat_map(|map| map.values())
                .filter(|v| v.is_object());
            match (candidates.next(), candidates.next()) {
                (Some(record), None) => record.clone(),
                (Some(_), Some(_)) => {
                    return Err(ProviderError::InvalidResponse(format!(
                        "ambiguous records for {}",
                        ip
                    )))
                }
                (None, _) => {
                    return Err(ProviderError::InvalidResponse(format!("no record for {}", ip)))
                }
            }
        }
    };

    serde_json::from_value(record)
        .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse record: {}", e)))
}

/// Merge a usable ProxyCheck record into the accumulated signal.
///
/// Without a prior signal the record becomes the signal. With one, only a
/// proxy flag changes anything, and the score can only go up.
pub fn merge(
    provider: &str,
    signal: Option<SignalBuilder>,
    record: ProxyCheckRecord,
) -> SignalBuilder {
    let Some(mut signal) = signal else {
        return SignalBuilder {
            fraud_score: clamp_score(record.risk.unwrap_or(0)),
            vpn: record.is_vpn(),
            proxy: record.proxy,
            tor: record.is_tor(),
            country_code: non_empty(record.isocode),
            region: non_empty(record.region),
            city: non_empty(record.city),
            latitude: record.latitude,
            longitude: record.longitude,
            isp: non_empty(record.provider),
            organization: non_empty(record.organisation),
            ..SignalBuilder::new(provider)
        };
    };

    signal.add_source(provider);

    if record.proxy {
        signal.proxy = true;
        if record.is_vpn() {
            signal.vpn = true;
        }
        if record.is_tor() {
            signal.tor = true;
        }

        match record.risk {
            Some(risk) => signal.raise_score(clamp_score(risk)),
            None => signal.raise_score(FLAGGED_PROXY_SCORE),
        }
    }

    signal
}

/// HTTP client for the ProxyCheck v2 API.
pub struct ProxyCheckClient {
    base_url: String,
    client: Client,
}

impl ProxyCheckClient {
    /// Create a new ProxyCheck client.
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

#[async_trait]
impl Lookup for ProxyCheckClient {
    type Record = ProxyCheckRecord;

    fn name(&self) -> &str {
        "proxycheck"
    }

    async fn lookup(
        &self,
        ip: &str,
        credential: Option<&str>,
    ) -> Result<ProxyCheckRecord, ProviderError> {
        let url = format!("{}/v2/{}", self.base_url, ip);
        let mut request = self
            .client
            .get(&url)
            .query(&[("vpn", "1"), ("asn", "1"), ("risk", "1")]);
        if let Some(key) = credential {
            request = request.query(&[("key", key)]);
        }

        debug!(ip = %ip, authenticated = credential.is_some(), "Querying ProxyCheck");

        let response = ensure_success(request.send().await?).await?;
        let body: Value = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        parse_response(ip, body)
    }
}
