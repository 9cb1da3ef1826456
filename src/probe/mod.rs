// src/probe/mod.rs
pub mod query;
pub mod status;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use crate::models::server::{QueryResult, ServerAddress, StatusResult};

/// Error strings that mean the address will never work as given.
const FATAL_MARKERS: &[&str] = &[
    "no such host",
    "no route",
    "unknown port",
    "too many colons in address",
    "invalid argument",
    "failed to lookup address",
    "name or service not known",
];

#[derive(Debug)]
pub enum ProbeError {
    Resolve(String),
    InvalidAddress(String),
    Io(io::Error),
    Timeout,
    Protocol(String),
    /// The probe task went away without reporting a result.
    Abandoned,
}

impl ProbeError {
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Resolve(_) | Self::InvalidAddress(_) => true,
            Self::Io(e) => {
                if e.kind() == io::ErrorKind::InvalidInput {
                    return true;
                }
                let message = e.to_string().to_ascii_lowercase();
                FATAL_MARKERS.iter().any(|marker| message.contains(marker))
            }
            Self::Timeout | Self::Protocol(_) | Self::Abandoned => false,
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve(host) => write!(f, "Could not resolve {}", host),
            Self::InvalidAddress(addr) => write!(f, "Invalid server address: {}", addr),
            Self::Io(e) => write!(f, "{}", e),
            Self::Timeout => write!(f, "Server did not respond in time"),
            Self::Protocol(msg) => write!(f, "Unexpected response: {}", msg),
            Self::Abandoned => write!(f, "Probe ended without a result"),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProbeError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Talks to one remote game server. Calls may block for a long time and
/// cannot be cancelled from the outside.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn probe_status(&self, address: &ServerAddress) -> Result<StatusResult, ProbeError>;
    async fn probe_query(&self, address: &ServerAddress) -> Result<QueryResult, ProbeError>;
}

/// Probes real Minecraft servers: Server List Ping for status, GameSpy4
/// for query.
pub struct MinecraftProbe {
    io_timeout: Duration,
}

impl MinecraftProbe {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

impl Default for MinecraftProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ProbeClient for MinecraftProbe {
    async fn probe_status(&self, address: &ServerAddress) -> Result<StatusResult, ProbeError> {
        let target = resolve(address, self.io_timeout).await?;
        status::ping(target, address.host(), self.io_timeout).await
    }

    async fn probe_query(&self, address: &ServerAddress) -> Result<QueryResult, ProbeError> {
        let target = resolve(address, self.io_timeout).await?;
        query::full_stat(target, self.io_timeout).await
    }
}

/// DNS lookup under the same I/O timeout as the socket operations. A lookup
/// that hangs ends as a transient `Timeout`.
pub(crate) async fn resolve(address: &ServerAddress, io_timeout: Duration) -> Result<SocketAddr, ProbeError> {
    resolve_with(address, io_timeout, tokio::net::lookup_host::<String>).await
}

async fn resolve_with<L, Fut, I>(address: &ServerAddress, io_timeout: Duration, lookup: L) -> Result<SocketAddr, ProbeError>
where
    L: FnOnce(String) -> Fut,
    Fut: Future<Output = io::Result<I>>,
    I: Iterator<Item = SocketAddr>,
{
    let lookup = async {
        lookup(address.to_string()).await.map_err(|e| match e.kind() {
            io::ErrorKind::InvalidInput => ProbeError::InvalidAddress(address.to_string()),
            _ => ProbeError::Resolve(format!("{}: {}", address.host(), e)),
        })
    };
    let mut addrs = with_timeout(io_timeout, lookup).await?;

    addrs
        .next()
        .ok_or_else(|| ProbeError::Resolve(address.host().to_string()))
}

/// Runs one socket operation under the probe's own I/O timeout.
pub(crate) async fn with_timeout<T, E, F>(limit: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ProbeError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ProbeError::Timeout),
    }
}
