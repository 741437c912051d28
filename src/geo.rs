use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use crate::config::GeoConfig;

/// Best-effort source address geolocation.
///
/// Implementations never fail: anything that goes wrong degrades to
/// `"Unknown"`, so the capture path does not depend on the lookup
/// service being reachable.
#[async_trait]
pub trait Locator: Send + Sync {
    async fn locate(&self, addr: IpAddr) -> String;
}

/// Locator backed by ip-api.com (free endpoint, no API key needed)
pub struct GeoClient {
    enabled: bool,
    client: Client,
}

impl GeoClient {
    pub fn new(config: &GeoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("decoyd/0.1")
            .build()?;

        Ok(Self {
            enabled: config.enabled,
            client,
        })
    }

    async fn lookup(&self, addr: IpAddr) -> Result<String> {
        let url = format!(
            "http://ip-api.com/json/{}?fields=status,message,country,regionName,city",
            addr
        );

        let resp: IpApiResponse = self.client.get(&url).send().await?.json().await?;

        if resp.status != "success" {
            anyhow::bail!("lookup failed: {}", resp.message.unwrap_or_default());
        }

        let parts: Vec<String> = [resp.city, resp.region_name, resp.country]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            anyhow::bail!("lookup returned no location fields");
        }

        Ok(parts.join(", "))
    }
}

#[async_trait]
impl Locator for GeoClient {
    async fn locate(&self, addr: IpAddr) -> String {
        if is_private(addr) {
            return "Local".to_string();
        }
        if !self.enabled {
            return "Unknown".to_string();
        }

        match self.lookup(addr).await {
            Ok(location) => location,
            Err(e) => {
                debug!("Geolocation lookup failed for {}: {}", addr, e);
                "Unknown".to_string()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    city: Option<String>,
}

/// Addresses that never leave the local network
pub fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            // Loopback, unique-local fc00::/7, link-local fe80::/10
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_private_ranges() {
        assert!(is_private(addr("127.0.0.1")));
        assert!(is_private(addr("10.1.2.3")));
        assert!(is_private(addr("172.16.0.1")));
        assert!(is_private(addr("192.168.1.100")));
        assert!(is_private(addr("169.254.0.5")));
        assert!(is_private(addr("::1")));
        assert!(is_private(addr("fd00::1")));
        assert!(is_private(addr("fe80::1")));

        assert!(!is_private(addr("8.8.8.8")));
        assert!(!is_private(addr("172.32.0.1")));
        assert!(!is_private(addr("203.0.113.9")));
        assert!(!is_private(addr("2001:4860:4860::8888")));
    }

    #[tokio::test]
    async fn test_private_short_circuits_to_local() {
        let client = GeoClient::new(&GeoConfig::default()).unwrap();
        assert_eq!(client.locate(addr("127.0.0.1")).await, "Local");
        assert_eq!(client.locate(addr("192.168.0.42")).await, "Local");
    }

    #[tokio::test]
    async fn test_disabled_lookup_is_unknown() {
        let config = GeoConfig {
            enabled: false,
            ..GeoConfig::default()
        };
        let client = GeoClient::new(&config).unwrap();
        assert_eq!(client.locate(addr("93.184.216.34")).await, "Unknown");
    }

    #[tokio::test]
    async fn test_failed_lookup_degrades_to_unknown() {
        let config = GeoConfig {
            enabled: true,
            timeout_secs: 1,
        };
        let client = GeoClient::new(&config).unwrap();

        // 203.0.113.9 sits in reserved TEST-NET-3 space: a reachable
        // endpoint answers "fail" for it, an unreachable one errors.
        // Either way the lookup degrades within the client timeout.
        let started = std::time::Instant::now();
        let location = client.locate(addr("203.0.113.9")).await;

        assert_eq!(location, "Unknown");
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
