use actix_web::{web, App, HttpServer};
use marketplace_chat_service::{
    config,
    db::{self, ChatStore, InMemoryChatStore, PgChatStore},
    error::AppError,
    gateway::JwtVerifier,
    logging, routes,
    state::AppState,
};
use std::sync::Arc;
use std::time::Duration;

const TYPING_SWEEP_TICK: Duration = Duration::from_secs(1);

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let store: Arc<dyn ChatStore> = match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::postgres::init_pool(url, cfg.db_max_connections)
                .await
                .map_err(|e| AppError::StartServer(format!("db: {e}")))?;
            Arc::new(PgChatStore::new(pool))
        }
        None => {
            if cfg.is_production() {
                return Err(AppError::Config("DATABASE_URL is required in production".into()));
            }
            tracing::warn!("DATABASE_URL not set, chats are kept in memory only");
            Arc::new(InMemoryChatStore::new())
        }
    };

    let verifier = Arc::new(JwtVerifier::new(&cfg.jwt_secret));
    let reload_interval = cfg.rules_reload_interval;
    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let service_name = cfg.service_name.clone();

    let state = AppState::new(cfg, store, verifier)?;

    let rules_info = state.rules.info().await;
    tracing::info!(
        version = %rules_info.version,
        rules = rules_info.rule_count,
        source = %rules_info.source,
        "moderation rules loaded"
    );

    let _rules_watcher = state.rules.clone().spawn_watcher(reload_interval);
    let _typing_sweeper = state.typing.clone().spawn_sweeper(TYPING_SWEEP_TICK);

    tracing::info!(%bind_addr, service = %service_name, "starting marketplace chat service");

    let app_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(web::Data::new(app_state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("server: {e}")))
}
