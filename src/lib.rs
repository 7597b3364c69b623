//! Multi-provider IP reputation aggregation.
//!
//! Queries IPInfo, ProxyCheck and IP2Location in a fixed order, rotating
//! through several API keys per provider, and reconciles their answers into
//! a single reputation record.
//!
//! # Features
//!
//! - **Credential Rotation** - Round-robin over each provider's API keys
//! - **Fault Isolation** - Failed, denied or timed-out lookups move on to the next key
//! - **Signal Reconciliation** - Proxy/VPN/Tor flags only escalate, scores only rise
//! - **Gap Filling** - Fallback geolocation fills missing country/ISP without overwriting
//! - **Keyless Mode** - ProxyCheck is queried anonymously when no key is configured
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   timeout_ms: 5000
//!
//! ipinfo:
//!   api_keys: ["${IPINFO_TOKEN}", "${IPINFO_TOKEN_2}"]
//!
//! proxycheck:
//!   api_keys: ["${PROXYCHECK_KEYS}"]
//!
//! ip2location:
//!   api_keys: ["${IP2LOCATION_KEY}"]
//! ```

pub mod aggregator;
pub mod config;
pub mod providers;
pub mod rotation;
pub mod server;

pub use aggregator::IpReputationAggregator;
pub use config::Config;
pub use providers::IpReputation;
