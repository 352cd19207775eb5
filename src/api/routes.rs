// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (no auth required)
        .route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        // Scheduler entry points (Bearer secret outside dev mode)
        .service(
            web::scope("/api/cron")
                .route("/{job}", web::get().to(handlers::run_cron_get))
                .route("/{job}", web::post().to(handlers::run_cron_post)),
        )
        // Presentation read path
        .route("/api/videos", web::get().to(handlers::list_videos));
}
