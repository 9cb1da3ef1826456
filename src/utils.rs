// src/utils.rs
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::RateLimiter;
use log::debug;
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::IpAddr;
use crate::cloudflare::CloudflareRanges;

pub const ADMIN_USER: &str = "mcapi";

pub type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

#[derive(Debug)]
pub enum RequestError {
    MissingPeerIP,
    MissingForwardedHeader,
    InvalidForwardedHeader,
    RateLimitExceeded,
    InvalidAddress(String),
    Unauthorized,
    NotFound(&'static str),
    Misconfigured(&'static str),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPeerIP => write!(f, "Failed to extract client IP"),
            Self::MissingForwardedHeader => write!(f, "Missing CF-Connecting-IP header"),
            Self::InvalidForwardedHeader => write!(f, "Invalid CF-Connecting-IP header"),
            Self::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            Self::InvalidAddress(e) => write!(f, "{}", e),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::NotFound(what) => write!(f, "{}", what),
            Self::Misconfigured(what) => write!(f, "Server is missing its {}", what),
        }
    }
}

impl ResponseError for RequestError {
    fn error_response(&self) -> HttpResponse {
        match self {
            Self::RateLimitExceeded => HttpResponse::TooManyRequests().body(self.to_string()),
            Self::Unauthorized => HttpResponse::Unauthorized()
                .insert_header((header::WWW_AUTHENTICATE, "Basic realm=\"mcapi\""))
                .body(self.to_string()),
            Self::NotFound(_) => HttpResponse::NotFound().body(self.to_string()),
            Self::Misconfigured(_) => HttpResponse::InternalServerError().body(self.to_string()),
            _ => HttpResponse::BadRequest().body(self.to_string()),
        }
    }
}

/// Resolves the client IP. A request coming from inside the trusted proxy
/// ranges is attributed to `CF-Connecting-IP`; anything else is attributed
/// to the peer itself. Empty ranges trust nobody.
pub fn extract_client_ip(req: &HttpRequest, proxies: &CloudflareRanges) -> Result<IpAddr, RequestError> {
    let peer_ip = match req.peer_addr() {
        Some(addr) => addr.ip(),
        None => return Err(RequestError::MissingPeerIP),
    };

    if !proxies.contains(peer_ip) {
        return Ok(peer_ip);
    }

    let value = req
        .headers()
        .get("CF-Connecting-IP")
        .ok_or(RequestError::MissingForwardedHeader)?;
    let client_ip = value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .ok_or(RequestError::InvalidForwardedHeader)?;

    debug!("Request via proxy {} for {}", peer_ip, client_ip);
    Ok(client_ip)
}

/// Checks HTTP Basic credentials for the admin user. An empty key disables
/// admin access altogether.
pub fn verify_admin(req: &HttpRequest, admin_key: &str) -> Result<(), RequestError> {
    if admin_key.is_empty() {
        return Err(RequestError::Unauthorized);
    }

    let encoded = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(RequestError::Unauthorized)?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| RequestError::Unauthorized)?;
    let credentials = String::from_utf8(decoded).map_err(|_| RequestError::Unauthorized)?;

    match credentials.split_once(':') {
        Some((user, key)) if user == ADMIN_USER && secrets_match(key, admin_key) => Ok(()),
        _ => Err(RequestError::Unauthorized),
    }
}

/// Compares fixed-size digests without short-circuiting.
fn secrets_match(given: &str, expected: &str) -> bool {
    let given = Sha256::digest(given.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
