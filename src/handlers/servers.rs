// src/handlers/servers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;
use crate::cloudflare::CloudflareRanges;
use crate::jobs::queue::WorkQueue;
use crate::jobs::RefreshJob;
use crate::models::server::{Kind, ServerAddress, Snapshot};
use crate::ratelimit::RateLimiter;
use crate::storage::memory::Registry;
use crate::utils::{extract_client_ip, RequestError};

#[derive(Deserialize)]
pub struct ServerParams {
    ip: String,
    port: Option<String>,
}

impl ServerParams {
    pub(crate) fn address(&self) -> Result<ServerAddress, RequestError> {
        ServerAddress::from_parts(&self.ip, self.port.as_deref())
            .map_err(|e| RequestError::InvalidAddress(e.to_string()))
    }
}

/// Consults the rate limiter before anything else is done for the request,
/// query extraction included.
pub(crate) fn admit(req: &HttpRequest) -> Result<(), RequestError> {
    let limiter = req
        .app_data::<web::Data<RateLimiter>>()
        .ok_or(RequestError::Misconfigured("rate limiter"))?;
    let client_ip = match req.app_data::<web::Data<CloudflareRanges>>() {
        Some(proxies) => extract_client_ip(req, proxies)?,
        None => extract_client_ip(req, &CloudflareRanges::default())?,
    };

    let verdict = limiter.check(client_ip);
    if verdict.limited {
        warn!("Rate limit exceeded for ip: {} ({})", client_ip, verdict.count);
        return Err(RequestError::RateLimitExceeded);
    }
    limiter.record_access(client_ip);
    Ok(())
}

/// Returns the cached snapshot. An address seen for the first time is
/// registered and gets one refresh right away instead of waiting for the
/// next pass.
async fn cached(registry: &Registry, queue: &dyn WorkQueue, address: ServerAddress, kind: Kind) -> Option<Snapshot> {
    if registry.register(&address, kind) {
        if let Err(e) = queue.enqueue(RefreshJob::new(address.clone(), kind)).await {
            debug!("Could not queue first {} refresh for {}: {}", kind, address, e);
        }
    }
    registry.get(&address, kind)
}

fn snapshot_response(snapshot: Option<Snapshot>) -> HttpResponse {
    match snapshot {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => HttpResponse::Ok().json(json!({
            "status": "unknown",
            "online": false,
            "error": "no data yet",
        })),
    }
}

pub async fn server_status(
    params: web::Query<ServerParams>,
    registry: web::Data<Registry>,
    queue: web::Data<dyn WorkQueue>,
) -> Result<HttpResponse, RequestError> {
    let address = params.address()?;
    let snapshot = cached(&registry, queue.get_ref(), address, Kind::Status).await;
    Ok(snapshot_response(snapshot))
}

pub async fn server_query(
    params: web::Query<ServerParams>,
    registry: web::Data<Registry>,
    queue: web::Data<dyn WorkQueue>,
) -> Result<HttpResponse, RequestError> {
    let address = params.address()?;
    let snapshot = cached(&registry, queue.get_ref(), address, Kind::Query).await;
    Ok(snapshot_response(snapshot))
}

/// Serves the favicon from the latest status snapshot as a PNG.
pub async fn server_image(
    params: web::Query<ServerParams>,
    registry: web::Data<Registry>,
    queue: web::Data<dyn WorkQueue>,
) -> Result<HttpResponse, RequestError> {
    let address = params.address()?;

    let favicon = match cached(&registry, queue.get_ref(), address, Kind::Status).await {
        Some(Snapshot::Status(status)) => status.favicon,
        _ => None,
    };
    let png = favicon
        .as_deref()
        .and_then(decode_favicon)
        .ok_or(RequestError::NotFound("No server image available"))?;

    Ok(HttpResponse::Ok().content_type("image/png").body(png))
}

fn decode_favicon(data_uri: &str) -> Option<Vec<u8>> {
    let (_, encoded) = data_uri.split_once("base64,")?;
    // some servers wrap the base64 payload
    let encoded: String = encoded.split_whitespace().collect();
    STANDARD.decode(encoded).ok()
}
