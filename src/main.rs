// src/main.rs
mod ban;
mod cloudflare;
mod config;
mod handlers;
mod jobs;
mod models;
mod probe;
mod ratelimit;
mod storage;
mod utils;

use actix_web::{middleware, web, App, HttpServer};
use env_logger::Env;
use log::{error, info};
use std::io;
use std::sync::Arc;
use crate::ban::BanPropagator;
use crate::cloudflare::{CloudflareFirewall, CloudflareRanges};
use crate::config::Config;
use crate::jobs::executor::JobExecutor;
use crate::jobs::queue::{self, WorkQueue};
use crate::jobs::scheduler::RefreshScheduler;
use crate::jobs::worker::WorkerPool;
use crate::probe::MinecraftProbe;
use crate::ratelimit::{AllowList, RateLimiter};
use crate::storage::memory::Registry;
use crate::utils::KeyedLimiter;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env();

    // Only trust forwarded client IPs when we sit behind Cloudflare
    let proxies = if config.trust_cloudflare_proxy {
        CloudflareRanges::fetch().await.map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to initialize Cloudflare ranges: {}", e),
            )
        })?
    } else {
        CloudflareRanges::default()
    };

    let allow_list = Arc::new(AllowList::parse(&config.approved_ips));
    info!("Approved IPs: {}", allow_list.len());

    let firewall = CloudflareFirewall::from_config(&config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to build firewall client: {}", e),
        )
    })?;
    let bans = Arc::new(BanPropagator::new(
        allow_list.clone(),
        Arc::new(firewall),
        config.cloudflare_enabled,
    ));
    let limiter = Arc::new(RateLimiter::new(allow_list, Some(bans), config.rate_limit_enabled));
    if config.rate_limit_enabled {
        let _decay = limiter.spawn_decay();
    }

    let registry = Arc::new(Registry::new());
    let (job_queue, job_source) = queue::channel();
    let job_queue: Arc<dyn WorkQueue> = Arc::new(job_queue);

    if config.fetch_enabled {
        info!("Fetching enabled.");
        let executor = Arc::new(JobExecutor::new(Arc::new(MinecraftProbe::default())));
        let pool = WorkerPool::new(
            executor,
            registry.clone(),
            config.worker_concurrency,
            config.job_timeout(),
        );
        tokio::spawn(async move {
            if let Err(e) = pool.run(job_source).await {
                error!("Refresh workers exited: {}", e);
            }
        });

        let scheduler = RefreshScheduler::new(registry.clone(), job_queue.clone(), config.refresh_interval());
        tokio::spawn(scheduler.run());
    } else {
        info!("Fetching is NOT enabled.");
        drop(job_source);
    }

    let bind = config.bind();
    let registry = web::Data::from(registry);
    let limiter = web::Data::from(limiter);
    let job_queue: web::Data<dyn WorkQueue> = web::Data::from(job_queue);
    let proxies = web::Data::new(proxies);
    let admin_rate_limiter = web::Data::new(KeyedLimiter::keyed(config.admin_quota()));
    let config = web::Data::new(config);

    info!("Starting server on {}", bind);
    HttpServer::new(move || {
        App::new()
            .wrap(
                middleware::DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Credentials", "true"))
                    .add(("Access-Control-Allow-Headers", "*"))
                    .add(("Access-Control-Allow-Methods", "GET"))
                    .add(("Cache-Control", "max-age=300, public, s-maxage=300")),
            )
            .app_data(registry.clone())
            .app_data(limiter.clone())
            .app_data(job_queue.clone())
            .app_data(proxies.clone())
            .app_data(admin_rate_limiter.clone())
            .app_data(config.clone())
            .configure(handlers::configure_admin)
            .configure(handlers::configure_public)
    })
        .bind(&bind)?
        .run().await
}
