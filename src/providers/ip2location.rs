//! IP2Location.io provider: fallback geolocation.

use super::{
    ensure_success, fill, http_client, lenient_bool, lenient_float, non_empty, Lookup,
    ProviderError, SignalBuilder, FLAGGED_PROXY_SCORE,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.ip2location.io";

/// IP2Location.io lookup response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ip2LocationRecord {
    #[serde(default)]
    pub country_code: Option<String>,

    #[serde(default)]
    pub region_name: Option<String>,

    #[serde(default)]
    pub city_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_float")]
    pub latitude: Option<f64>,

    #[serde(default, deserialize_with = "lenient_float")]
    pub longitude: Option<f64>,

    /// Only returned on paid plans.
    #[serde(default)]
    pub isp: Option<String>,

    /// Autonomous system name.
    #[serde(default, rename = "as")]
    pub as_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_proxy: bool,
}

impl Ip2LocationRecord {
    fn isp_or_as(&self) -> Option<String> {
        non_empty(self.isp.clone()).or_else(|| non_empty(self.as_name.clone()))
    }
}

/// Merge a fallback record into the accumulated signal.
///
/// A prior signal only has its empty fields filled in. This provider cannot
/// detect VPNs, so a fresh signal never reports one.
pub fn merge(
    provider: &str,
    signal: Option<SignalBuilder>,
    record: Ip2LocationRecord,
) -> SignalBuilder {
    let isp = record.isp_or_as();

    let Some(mut signal) = signal else {
        return SignalBuilder {
            fraud_score: if record.is_proxy { FLAGGED_PROXY_SCORE } else { 0 },
            vpn: false,
            proxy: record.is_proxy,
            country_code: non_empty(record.country_code),
            region: non_empty(record.region_name),
            city: non_empty(record.city_name),
            latitude: record.latitude,
            longitude: record.longitude,
            isp,
            organization: non_empty(record.as_name),
            ..SignalBuilder::new(provider)
        };
    };

    signal.add_source(provider);

    fill(&mut signal.country_code, non_empty(record.country_code));
    fill(&mut signal.region, non_empty(record.region_name));
    fill(&mut signal.city, non_empty(record.city_name));
    fill(&mut signal.latitude, record.latitude);
    fill(&mut signal.longitude, record.longitude);
    fill(&mut signal.isp, isp);
    fill(&mut signal.organization, non_empty(record.as_name));

    if record.is_proxy && !signal.proxy {
        signal.proxy = true;
        signal.raise_score(FLAGGED_PROXY_SCORE);
    }

    signal
}

/// Turn a raw response body into a record, rejecting error payloads.
pub fn parse_response(body: Value) -> Result<Ip2LocationRecord, ProviderError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("error_message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderError::InvalidResponse(message));
    }

    serde_json::from_value(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

/// HTTP client for the IP2Location.io API.
pub struct Ip2LocationClient {
    base_url: String,
    client: Client,
}

impl Ip2LocationClient {
    /// Create a new IP2Location client.
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
impl Lookup for Ip2LocationClient {
    type Record = Ip2LocationRecord;

    fn name(&self) -> &str {
        "ip2location"
    }

    async fn lookup(
        &self,
        ip: &str,
        credential: Option<&str>,
    ) -> Result<Ip2LocationRecord, ProviderError> {
        let url = format!("{}/", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(&[("ip", ip), ("format", "json")]);
        if let Some(key) = credential {
            request = request.query(&[("key", key)]);
        }

        debug!(ip = %ip, "Querying IP2Location");

        let response = ensure_success(request.send().await?).await?;
        let body: Value = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        parse_response(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::tests::stub_server;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn test_parse_response() {
        let body = json!({
            "ip": "8.8.8.8",
            "country_code": "US",
            "country_name": "United States of America",
            "region_name": "California",
            "city_name": "Mountain View",
            "latitude": 37.38605,
            "longitude": -122.08385,
            "asn": "15169",
            "as": "Google LLC",
            "is_proxy": false
        });

        let record = parse_response(body).unwrap();
        assert_eq!(record.country_code.as_deref(), Some("US"));
        assert_eq!(record.as_name.as_deref(), Some("Google LLC"));
        assert_eq!(record.isp_or_as().as_deref(), Some("Google LLC"));
        assert!(!record.is_proxy);
    }

    #[test]
    fn test_parse_error_payload() {
        let body = json!({
            "error": {
                "error_code": 10000,
                "error_message": "Invalid API key or insufficient credit."
            }
        });
        match parse_response(body) {
            Err(ProviderError::InvalidResponse(msg)) => {
                assert_eq!(msg, "Invalid API key or insufficient credit.")
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_without_prior_signal() {
        let record = Ip2LocationRecord {
            country_code: Some("BR".to_string()),
            city_name: Some("Sao Paulo".to_string()),
            as_name: Some("Example Telecom".to_string()),
            is_proxy: true,
            ..Ip2LocationRecord::default()
        };

        let signal = merge("ip2location", None, record);
        assert_eq!(signal.fraud_score, 75);
        assert!(signal.proxy);
        assert!(!signal.vpn);
        assert!(!signal.tor);
        assert_eq!(signal.country_code.as_deref(), Some("BR"));
        assert_eq!(signal.isp.as_deref(), Some("Example Telecom"));
        assert_eq!(signal.organization.as_deref(), Some("Example Telecom"));
    }

    #[test]
    fn test_merge_clean_without_prior_signal() {
        let signal = merge("ip2location", None, Ip2LocationRecord::default());
        assert_eq!(signal.fraud_score, 0);
        assert!(!signal.proxy);
    }

    #[test]
    fn test_merge_never_overwrites() {
        let existing = SignalBuilder {
            fraud_score: 30,
            country_code: Some("US".to_string()),
            latitude: Some(1.0),
            ..SignalBuilder::new("ipinfo")
        };
        let record = Ip2LocationRecord {
            country_code: Some("DE".to_string()),
            region_name: Some("Berlin".to_string()),
            latitude: Some(52.5),
            longitude: Some(13.4),
            isp: Some("Acme".to_string()),
            ..Ip2LocationRecord::default()
        };

        let signal = merge("ip2location", Some(existing), record);
        assert_eq!(signal.country_code.as_deref(), Some("US"));
        assert_eq!(signal.latitude, Some(1.0));
        assert_eq!(signal.region.as_deref(), Some("Berlin"));
        assert_eq!(signal.longitude, Some(13.4));
        assert_eq!(signal.isp.as_deref(), Some("Acme"));
        assert_eq!(signal.fraud_score, 30);
        assert_eq!(signal.sources, vec!["ipinfo", "ip2location"]);
    }

    #[test]
    fn test_merge_proxy_flag_raises_score() {
        let existing = SignalBuilder {
            fraud_score: 20,
            ..SignalBuilder::new("ipinfo")
        };
        let record = Ip2LocationRecord {
            is_proxy: true,
            ..Ip2LocationRecord::default()
        };

        let signal = merge("ip2location", Some(existing), record);
        assert!(signal.proxy);
        assert_eq!(signal.fraud_score, 75);
    }

    #[test]
    fn test_merge_proxy_flag_ignored_when_already_proxy() {
        let existing = SignalBuilder {
            fraud_score: 25,
            proxy: true,
            ..SignalBuilder::new("ipinfo")
        };
        let record = Ip2LocationRecord {
            is_proxy: true,
            ..Ip2LocationRecord::default()
        };

        let signal = merge("ip2location", Some(existing), record);
        assert_eq!(signal.fraud_score, 25);
    }

    #[test]
    fn test_parse_null_proxy_flag() {
        let record = parse_response(json!({"country_code": "US", "is_proxy": null, "as": "X"}))
            .unwrap();
        assert!(!record.is_proxy);
        assert_eq!(record.country_code.as_deref(), Some("US"));
    }

    #[tokio::test]
    async fn test_lookup_query_and_key() {
        let body = json!({"ip": "8.8.8.8", "country_code": "US", "as": "Google LLC"});
        let (base_url, seen) = stub_server("/", StatusCode::OK, body).await;
        let client =
            Ip2LocationClient::new(base_url, Duration::from_secs(5), "test-agent").unwrap();

        let record = client.lookup("8.8.8.8", None).await.unwrap();
        assert_eq!(record.isp_or_as().as_deref(), Some("Google LLC"));
        client.lookup("8.8.8.8", Some("i2l-key")).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].get("ip").map(String::as_str), Some("8.8.8.8"));
        assert_eq!(seen[0].get("format").map(String::as_str), Some("json"));
        assert!(!seen[0].contains_key("key"));
        assert_eq!(seen[1].get("key").map(String::as_str), Some("i2l-key"));
    }

    #[tokio::test]
    async fn test_lookup_error_statuses() {
        let (base_url, _) = stub_server("/", StatusCode::UNAUTHORIZED, json!({})).await;
        let client =
            Ip2LocationClient::new(base_url, Duration::from_secs(5), "test-agent").unwrap();
        assert!(matches!(
            client.lookup("8.8.8.8", Some("i2l-key")).await,
            Err(ProviderError::Denied(_))
        ));

        let (base_url, _) = stub_server("/", StatusCode::BAD_GATEWAY, json!({})).await;
        let client =
            Ip2LocationClient::new(base_url, Duration::from_secs(5), "test-agent").unwrap();
        assert!(matches!(
            client.lookup("8.8.8.8", Some("i2l-key")).await,
            Err(ProviderError::InvalidResponse(_))
        ));
    }
}
