// src/handlers/mod.rs
pub mod admin;
pub mod index;
pub mod servers;

use actix_web::dev::Service as _;
use actix_web::web;

/// Public routes. Every request, including malformed ones and unknown paths,
/// passes the rate limiter before any extractor runs.
///
/// The scope matches every path, so admin routes must be registered first.
pub fn configure_public(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .wrap_fn(|req, srv| {
                let call = match servers::admit(req.request()) {
                    Ok(()) => Ok(srv.call(req)),
                    Err(e) => Err(req.error_response(e)),
                };
                async move {
                    match call {
                        Ok(fut) => fut.await,
                        Err(denied) => Ok(denied),
                    }
                }
            })
            .route("/health", web::get().to(index::health))
            .route("/server/status", web::get().to(servers::server_status))
            .route("/minecraft/1.3/server/status", web::get().to(servers::server_status))
            .route("/server/query", web::get().to(servers::server_query))
            .route("/minecraft/1.3/server/query", web::get().to(servers::server_query))
            .route("/server/image", web::get().to(servers::server_image)),
    );
}

pub fn configure_admin(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .route("/status", web::get().to(admin::list_status))
            .route("/query", web::get().to(admin::list_query))
            .route("/clear", web::post().to(admin::clear))
            .route("/delete", web::post().to(admin::delete)),
    );
}
