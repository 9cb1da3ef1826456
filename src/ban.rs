// src/ban.rs
use async_trait::async_trait;
use log::{error, info};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use crate::ratelimit::AllowList;

pub const BAN_REASON: &str = "blocked by count threshold";

#[derive(Debug)]
pub enum FirewallError {
    Transport(reqwest::Error),
    Rejected { status: u16, body: String },
}

impl fmt::Display for FirewallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Firewall request failed: {}", e),
            Self::Rejected { status, body } => write!(f, "Firewall rejected rule ({}): {}", status, body),
        }
    }
}

impl std::error::Error for FirewallError {}

impl From<reqwest::Error> for FirewallError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e)
    }
}

/// Remote control plane that enforces IP blocks.
#[async_trait]
pub trait Firewall: Send + Sync {
    async fn block(&self, ip: IpAddr, reason: &str) -> Result<(), FirewallError>;
}

/// Forwards each offending IP to the firewall at most once per process.
pub struct BanPropagator {
    banned: RwLock<HashSet<IpAddr>>,
    allow_list: Arc<AllowList>,
    firewall: Arc<dyn Firewall>,
    enabled: bool,
}

impl BanPropagator {
    pub fn new(allow_list: Arc<AllowList>, firewall: Arc<dyn Firewall>, enabled: bool) -> Self {
        Self {
            banned: RwLock::new(HashSet::new()),
            allow_list,
            firewall,
            enabled,
        }
    }

    /// Records the ban and fires the outbound call in the background. Returns
    /// the call's handle only to the caller that actually claimed the IP.
    ///
    /// The IP is recorded before the call is made, so a failed call still
    /// leaves it marked as banned here.
    pub fn maybe_ban(&self, ip: IpAddr) -> Option<JoinHandle<()>> {
        if !self.enabled || self.allow_list.contains(&ip) {
            return None;
        }
        if self.banned.read().contains(&ip) {
            return None;
        }
        if !self.banned.write().insert(ip) {
            return None;
        }

        info!("Blocking IP {} at firewall level ({} blocked so far) ...", ip, self.banned_count());
        let firewall = Arc::clone(&self.firewall);
        Some(tokio::spawn(async move {
            match firewall.block(ip, BAN_REASON).await {
                Ok(()) => info!("Blocked IP {} at firewall level", ip),
                Err(e) => error!("Failed to block IP {}: {}", ip, e),
            }
        }))
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.banned.read().contains(ip)
    }

    pub fn banned_count(&self) -> usize {
        self.banned.read().len()
    }
}
