// src/handlers/admin.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::{error, info};
use std::fmt::Write;
use crate::cloudflare::CloudflareRanges;
use crate::config::Config;
use crate::handlers::servers::ServerParams;
use crate::models::server::Kind;
use crate::storage::memory::Registry;
use crate::utils::{extract_client_ip, verify_admin, KeyedLimiter, RequestError};

fn admit_admin(
    req: &HttpRequest,
    config: &Config,
    rate_limiter: &KeyedLimiter,
    proxies: &CloudflareRanges,
) -> Result<(), RequestError> {
    let client_ip = extract_client_ip(req, proxies)?;

    if rate_limiter.check_key(&client_ip).is_err() {
        error!("Rate limit exceeded for admin for ip: {}", client_ip);
        return Err(RequestError::RateLimitExceeded);
    }

    verify_admin(req, &config.admin_key)
}

/// One `address - last_updated` line per tracked address of this kind.
fn listing(registry: &Registry, kind: Kind) -> String {
    let mut lines = Vec::new();
    registry.for_each(|entry| {
        if entry.kind != kind {
            return;
        }
        let updated = match &entry.snapshot {
            Some(s) if s.is_online() => s.last_updated().to_rfc3339(),
            Some(s) => format!("{} (offline)", s.last_updated().to_rfc3339()),
            None => "pending".to_string(),
        };
        lines.push((entry.address.clone(), updated));
    });
    lines.sort();

    let mut body = String::new();
    for (address, updated) in lines {
        let _ = writeln!(body, "{} - {}", address, updated);
    }
    body
}

pub async fn list_status(
    req: HttpRequest,
    registry: web::Data<Registry>,
    config: web::Data<Config>,
    rate_limiter: web::Data<KeyedLimiter>,
    proxies: web::Data<CloudflareRanges>,
) -> Result<HttpResponse, RequestError> {
    admit_admin(&req, &config, &rate_limiter, &proxies)?;
    Ok(HttpResponse::Ok().content_type("text/plain").body(listing(&registry, Kind::Status)))
}

pub async fn list_query(
    req: HttpRequest,
    registry: web::Data<Registry>,
    config: web::Data<Config>,
    rate_limiter: web::Data<KeyedLimiter>,
    proxies: web::Data<CloudflareRanges>,
) -> Result<HttpResponse, RequestError> {
    admit_admin(&req, &config, &rate_limiter, &proxies)?;
    Ok(HttpResponse::Ok().content_type("text/plain").body(listing(&registry, Kind::Query)))
}

pub async fn clear(
    req: HttpRequest,
    registry: web::Data<Registry>,
    config: web::Data<Config>,
    rate_limiter: web::Data<KeyedLimiter>,
    proxies: web::Data<CloudflareRanges>,
) -> Result<HttpResponse, RequestError> {
    admit_admin(&req, &config, &rate_limiter, &proxies)?;

    let removed = registry.len();
    registry.clear();
    info!("Cleared {} registry entries", removed);

    Ok(HttpResponse::Ok().body("Cleared items."))
}

pub async fn delete(
    req: HttpRequest,
    params: web::Query<ServerParams>,
    registry: web::Data<Registry>,
    config: web::Data<Config>,
    rate_limiter: web::Data<KeyedLimiter>,
    proxies: web::Data<CloudflareRanges>,
) -> Result<HttpResponse, RequestError> {
    admit_admin(&req, &config, &rate_limiter, &proxies)?;

    let address = params.address()?;
    registry.delete(&address);
    info!("Stopped tracking {}", address);

    Ok(HttpResponse::Ok().body(format!("Deleted {}.", address)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::Arc;
    use std::time::Duration;
    use crate::models::server::{ServerAddress, Snapshot, StatusResult};

    fn addr(s: &str) -> ServerAddress {
        ServerAddress::parse(s).unwrap()
    }

    fn auth(key: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("mcapi:{}", key)))
    }

    #[actix_web::test]
    async fn listing_and_clear_require_credentials() {
        let registry = Arc::new(Registry::new());
        registry.register(&addr("mc2"), Kind::Status);
        registry.put(&addr("mc1"), Snapshot::status(StatusResult::default(), Duration::ZERO));
        registry.register(&addr("mc3"), Kind::Query);

        let config = Config {
            admin_key: "hunter2".into(),
            ..Config::default()
        };
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(registry.clone()))
                .app_data(web::Data::new(KeyedLimiter::keyed(config.admin_quota())))
                .app_data(web::Data::new(config))
                .app_data(web::Data::new(CloudflareRanges::default()))
                .configure(crate::handlers::configure_admin),
        )
        .await;
        let peer = "198.51.100.30:40000".parse().unwrap();

        let req = test::TestRequest::get()
            .uri("/admin/status")
            .peer_addr(peer)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/admin/status")
            .peer_addr(peer)
            .insert_header((header::AUTHORIZATION, auth("hunter2")))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        let body = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("mc1:25565 - "));
        assert_eq!(lines[1], "mc2:25565 - pending");

        let req = test::TestRequest::post()
            .uri("/admin/clear")
            .peer_addr(peer)
            .insert_header((header::AUTHORIZATION, auth("wrong")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(registry.len(), 3);

        let req = test::TestRequest::post()
            .uri("/admin/clear")
            .peer_addr(peer)
            .insert_header((header::AUTHORIZATION, auth("hunter2")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(registry.len(), 0);
    }

    #[actix_web::test]
    async fn delete_stops_tracking_both_kinds() {
        let registry = Arc::new(Registry::new());
        registry.register(&addr("mc1"), Kind::Status);
        registry.register(&addr("mc1"), Kind::Query);
        registry.put(&addr("mc1"), Snapshot::failed(Kind::Status, "connection refused".into()));
        registry.register(&addr("mc2"), Kind::Status);

        let config = Config {
            admin_key: "hunter2".into(),
            ..Config::default()
        };
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(registry.clone()))
                .app_data(web::Data::new(KeyedLimiter::keyed(config.admin_quota())))
                .app_data(web::Data::new(config))
                .app_data(web::Data::new(CloudflareRanges::default()))
                .configure(crate::handlers::configure_admin),
        )
        .await;
        let peer = "198.51.100.31:40000".parse().unwrap();

        let req = test::TestRequest::get()
            .uri("/admin/status")
            .peer_addr(peer)
            .insert_header((header::AUTHORIZATION, auth("hunter2")))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.lines().next().unwrap().ends_with("(offline)"));

        let req = test::TestRequest::post()
            .uri("/admin/delete?ip=MC1")
            .peer_addr(peer)
            .insert_header((header::AUTHORIZATION, auth("hunter2")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&addr("mc1"), Kind::Status).is_none());
        assert!(registry.get(&addr("mc1"), Kind::Query).is_none());
    }
}
