//! Three-stage IP reputation pipeline.
//!
//! Stages run in a fixed order because each one merges into what the
//! previous stages produced:
//!
//! 1. IPInfo builds the initial signal from geolocation and privacy flags.
//! 2. ProxyCheck confirms or escalates proxy/VPN/Tor detection.
//! 3. IP2Location fills in location and ISP gaps, only when needed.
//!
//! Provider failures never escape: the worst outcome is `None`.

use crate::config::{Config, ProviderConfig, Settings};
use crate::providers::ip2location::{self, Ip2LocationClient, Ip2LocationRecord};
use crate::providers::ipinfo::{self, IpInfoClient, IpInfoRecord};
use crate::providers::proxycheck::{self, ProxyCheckClient, ProxyCheckRecord};
use crate::providers::{needs_fallback, IpReputation, Lookup, ProviderError, SignalBuilder};
use crate::rotation::CredentialPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One provider plus its credential pool.
pub struct ProviderStage<R> {
    client: Arc<dyn Lookup<Record = R>>,
    pool: CredentialPool,
    timeout: Duration,
}

impl<R: Send> ProviderStage<R> {
    /// Create a stage around `client`, rotating through `pool`.
    pub fn new(
        client: Arc<dyn Lookup<Record = R>>,
        pool: CredentialPool,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            pool,
            timeout,
        }
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        self.client.name()
    }

    /// Number of configured credentials.
    pub fn credential_count(&self) -> usize {
        self.pool.len()
    }

    /// Try up to `attempts` lookups, one credential each, until one succeeds.
    ///
    /// Every attempt is logged; failures are swallowed.
    async fn rotate(&self, ip: &str, attempts: usize) -> Option<R> {
        for attempt in 0..attempts {
            let credential = self.pool.next();
            let lookup = self.client.lookup(ip, credential);

            let outcome = match tokio::time::timeout(self.timeout, lookup).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout),
            };

            match outcome {
                Ok(record) => {
                    debug!(
                        provider = self.name(),
                        ip = %ip,
                        attempt = attempt,
                        "Provider lookup succeeded"
                    );
                    return Some(record);
                }
                Err(ProviderError::Denied(reason)) => {
                    warn!(
                        provider = self.name(),
                        ip = %ip,
                        attempt = attempt,
                        reason = %reason,
                        "Provider denied credential"
                    );
                }
                Err(e) => {
                    warn!(
                        provider = self.name(),
                        ip = %ip,
                        attempt = attempt,
                        error = %e,
                        "Provider lookup failed"
                    );
                }
            }
        }

        None
    }
}

/// Aggregates IPInfo, ProxyCheck and IP2Location into one reputation.
///
/// Disabled providers are `None` and never queried.
pub struct IpReputationAggregator {
    ipinfo: Option<ProviderStage<IpInfoRecord>>,
    proxycheck: Option<ProviderStage<ProxyCheckRecord>>,
    ip2location: Option<ProviderStage<Ip2LocationRecord>>,
}

impl IpReputationAggregator {
    /// Assemble an aggregator from explicit stages.
    pub fn new(
        ipinfo: Option<ProviderStage<IpInfoRecord>>,
        proxycheck: Option<ProviderStage<ProxyCheckRecord>>,
        ip2location: Option<ProviderStage<Ip2LocationRecord>>,
    ) -> Self {
        Self {
            ipinfo,
            proxycheck,
            ip2location,
        }
    }

    /// Build the HTTP-backed aggregator described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let settings = &config.settings;

        let ipinfo = build_stage(
            &config.ipinfo,
            settings,
            ipinfo::DEFAULT_BASE_URL,
            |url, timeout, agent| {
                IpInfoClient::new(url, timeout, agent)
                    .map(|c| Arc::new(c) as Arc<dyn Lookup<Record = IpInfoRecord>>)
            },
        )?;

        let proxycheck = build_stage(
            &config.proxycheck,
            settings,
            proxycheck::DEFAULT_BASE_URL,
            |url, timeout, agent| {
                ProxyCheckClient::new(url, timeout, agent)
                    .map(|c| Arc::new(c) as Arc<dyn Lookup<Record = ProxyCheckRecord>>)
            },
        )?;

        let ip2location = build_stage(
            &config.ip2location,
            settings,
            ip2location::DEFAULT_BASE_URL,
            |url, timeout, agent| {
                Ip2LocationClient::new(url, timeout, agent)
                    .map(|c| Arc::new(c) as Arc<dyn Lookup<Record = Ip2LocationRecord>>)
            },
        )?;

        let aggregator = Self::new(ipinfo, proxycheck, ip2location);
        info!(
            ipinfo_keys = aggregator.ipinfo.as_ref().map(ProviderStage::credential_count),
            proxycheck_keys = aggregator.proxycheck.as_ref().map(ProviderStage::credential_count),
            ip2location_keys = aggregator.ip2location.as_ref().map(ProviderStage::credential_count),
            "IP reputation aggregator initialized"
        );

        Ok(aggregator)
    }

    /// Look up `ip` across all providers and reconcile the answers.
    ///
    /// Returns `None` when no provider produced anything. That is a normal
    /// outcome, not an error, and the aggregator does not retry.
    pub async fn check_ip(&self, ip: &str) -> Option<IpReputation> {
        let signal = self.run_primary(ip).await;
        let signal = self.run_secondary(ip, signal).await;
        let signal = if needs_fallback(signal.as_ref()) {
            self.run_tertiary(ip, signal).await
        } else {
            signal
        };

        match signal {
            Some(signal) => {
                let reputation = signal.build();
                info!(
                    ip = %ip,
                    score = reputation.fraud_score,
                    vpn = reputation.vpn,
                    proxy = reputation.proxy,
                    tor = reputation.tor,
                    sources = ?reputation.sources,
                    "Reputation lookup complete"
                );
                Some(reputation)
            }
            None => {
                warn!(ip = %ip, "No reputation data available");
                None
            }
        }
    }

    /// IPInfo: one attempt per credential; skipped without credentials.
    async fn run_primary(&self, ip: &str) -> Option<SignalBuilder> {
        let stage = self.ipinfo.as_ref()?;
        if stage.pool.is_empty() {
            debug!(provider = stage.name(), "No credentials configured, skipping");
            return None;
        }

        let record = stage.rotate(ip, stage.pool.len()).await?;
        Some(ipinfo::signal_from(stage.name(), record))
    }

    /// ProxyCheck: at least one attempt, anonymous when no key is configured.
    async fn run_secondary(
        &self,
        ip: &str,
        signal: Option<SignalBuilder>,
    ) -> Option<SignalBuilder> {
        let Some(stage) = self.proxycheck.as_ref() else {
            return signal;
        };

        let attempts = stage.pool.len().max(1);
        match stage.rotate(ip, attempts).await {
            Some(record) => Some(proxycheck::merge(stage.name(), signal, record)),
            None => signal,
        }
    }

    /// IP2Location: gap filling; skipped without credentials.
    async fn run_tertiary(
        &self,
        ip: &str,
        signal: Option<SignalBuilder>,
    ) -> Option<SignalBuilder> {
        let Some(stage) = self.ip2location.as_ref() else {
            return signal;
        };
        if stage.pool.is_empty() {
            debug!(provider = stage.name(), "No credentials configured, skipping");
            return signal;
        }

        match stage.rotate(ip, stage.pool.len()).await {
            Some(record) => Some(ip2location::merge(stage.name(), signal, record)),
            None => signal,
        }
    }
}

fn build_stage<R, F>(
    config: &ProviderConfig,
    settings: &Settings,
    default_url: &str,
    make_client: F,
) -> Result<Option<ProviderStage<R>>, ProviderError>
where
    R: Send,
    F: FnOnce(&str, Duration, &str) -> Result<Arc<dyn Lookup<Record = R>>, ProviderError>,
{
    if !config.enabled {
        return Ok(None);
    }

    let timeout = config.timeout(settings);
    let client = make_client(config.base_url_or(default_url), timeout, &settings.user_agent)?;
    Ok(Some(ProviderStage::new(
        client,
        CredentialPool::new(config.credentials()),
        timeout,
    )))
}
