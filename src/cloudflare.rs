// src/cloudflare.rs
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use log::{error, info};
use serde::Serialize;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;
use crate::ban::{Firewall, FirewallError};
use crate::config::Config;

const IPV4_URL: &str = "https://www.cloudflare.com/ips-v4/";
const IPV6_URL: &str = "https://www.cloudflare.com/ips-v6/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Cloudflare's published edge ranges. Requests arriving from these are
/// attributed to the client named in `CF-Connecting-IP`.
#[derive(Debug, Default)]
pub struct CloudflareRanges {
    networks: Vec<IpNetwork>,
}

impl CloudflareRanges {
    pub fn from_networks(networks: Vec<IpNetwork>) -> Self {
        Self { networks }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(ip))
    }

    pub async fn fetch() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut networks = Vec::new();
        for url in [IPV4_URL, IPV6_URL] {
            info!("Fetching Cloudflare ranges from {}...", url);
            match fetch_ip_ranges(url).await {
                Ok(ranges) => {
                    info!("Loaded {} ranges", ranges.len());
                    networks.extend(ranges);
                }
                Err(e) => {
                    error!("Failed to fetch {}: {}", url, e);
                    return Err(e);
                }
            }
        }
        Ok(Self::from_networks(networks))
    }
}

async fn fetch_ip_ranges(url: &str) -> Result<Vec<IpNetwork>, Box<dyn std::error::Error + Send + Sync>> {
    let response = reqwest::get(url).await?.error_for_status()?;
    let text = response.text().await?;
    Ok(parse_ranges(&text))
}

fn parse_ranges(text: &str) -> Vec<IpNetwork> {
    text.lines()
        .filter_map(|line| IpNetwork::from_str(line.trim()).ok())
        .collect()
}

#[derive(Serialize)]
struct AccessRule<'a> {
    mode: &'a str,
    configuration: RuleConfiguration,
    notes: &'a str,
}

#[derive(Serialize)]
struct RuleConfiguration {
    target: &'static str,
    value: String,
}

/// Posts block rules to the Cloudflare user-level firewall.
pub struct CloudflareFirewall {
    client: reqwest::Client,
    rules_url: String,
    email: String,
    auth_key: String,
    // Callers queue for a slot instead of failing when all are taken.
    connections: Semaphore,
}

impl CloudflareFirewall {
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.firewall_max_idle)
            .pool_idle_timeout(Duration::from_secs(config.firewall_idle_timeout_secs))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            rules_url: format!(
                "{}/user/firewall/access_rules/rules",
                config.cloudflare_api_url.trim_end_matches('/')
            ),
            email: config.cloudflare_email.clone(),
            auth_key: config.cloudflare_auth.clone(),
            connections: Semaphore::new(config.firewall_max_connections.max(1)),
        })
    }
}

#[async_trait]
impl Firewall for CloudflareFirewall {
    async fn block(&self, ip: IpAddr, reason: &str) -> Result<(), FirewallError> {
        let Ok(_permit) = self.connections.acquire().await else {
            return Err(FirewallError::Rejected {
                status: 0,
                body: "connection pool closed".into(),
            });
        };

        let rule = AccessRule {
            mode: "block",
            configuration: RuleConfiguration {
                target: "ip",
                value: ip.to_string(),
            },
            notes: reason,
        };

        let response = self
            .client
            .post(&self.rules_url)
            .header("X-Auth-Email", &self.email)
            .header("X-Auth-Key", &self.auth_key)
            .json(&rule)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FirewallError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
