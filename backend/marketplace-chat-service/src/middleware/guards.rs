//! Request guards for the REST surface.

use crate::error::AppError;
use crate::models::AuthenticatedUser;
use crate::state::AppState;
use actix_web::{dev::Payload, http::header::AUTHORIZATION, web, Error, FromRequest, HttpRequest};
use futures_util::future::LocalBoxFuture;
use std::ops::Deref;

/// Caller identity verified from the `Authorization: Bearer` header
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthenticatedUser);

impl Deref for AuthUser {
    type Target = AuthenticatedUser;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequest for AuthUser {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Box::pin(async move {
            let state =
                state.ok_or_else(|| AppError::Internal("application state not configured".into()))?;
            let token = header
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
                .ok_or_else(|| AppError::Auth("missing bearer token".into()))?;

            let user = state.gateway.verify(token).await?;
            Ok(AuthUser(user))
        })
    }
}
