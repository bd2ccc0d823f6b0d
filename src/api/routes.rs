// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::service_info))
        .route("/health", web::get().to(handlers::health))
        .service(
            web::scope("/videos")
                .route("", web::get().to(handlers::list_videos))
                .route("/refresh", web::post().to(handlers::refresh_videos))
                .route("/{pageid}", web::get().to(handlers::get_video)),
        );
}
