pub mod admin;
pub mod chats;
pub mod violations;
pub mod wsroute;

use crate::metrics::metrics_handler;
use actix_web::web;

/// Mount every route of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(wsroute::ws_handler)
        .service(
            web::scope("/api/v1")
                .service(chats::open_chat)
                .service(chats::get_messages)
                .service(chats::close_chat)
                .service(chats::store_stats)
                .service(chats::list_store_chats)
                .service(violations::list_violations)
                .service(violations::get_violation)
                .service(violations::act_on_violation)
                .service(admin::rules_info)
                .service(admin::reload_rules),
        )
        .route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics_handler));
}
