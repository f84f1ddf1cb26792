use crate::{error::AppError, middleware::AuthUser, state::AppState};
use actix_web::{get, post, web, HttpResponse};

fn require_admin(user: &AuthUser) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// GET /admin/rules
/// Version and size of the rule table in use
#[get("/admin/rules")]
pub async fn rules_info(state: web::Data<AppState>, user: AuthUser) -> Result<HttpResponse, AppError> {
    require_admin(&user)?;
    Ok(HttpResponse::Ok().json(state.rules.info().await))
}

/// POST /admin/rules/reload
/// Re-read the rule file; a broken file leaves the current table in place
#[post("/admin/rules/reload")]
pub async fn reload_rules(
    state: web::Data<AppState>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    require_admin(&user)?;
    let info = state
        .rules
        .reload()
        .await
        .map_err(|e| AppError::BadRequest(format!("rules not reloaded: {e}")))?;

    tracing::info!(
        version = %info.version,
        revision = info.revision,
        admin_id = %user.user_id,
        "moderation rules reloaded on request"
    );
    Ok(HttpResponse::Ok().json(info))
}
