// src/handlers/index.rs
use actix_web::HttpResponse;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body(":3")
}
