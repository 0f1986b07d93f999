use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Query, State},
    response::{IntoResponse, Redirect},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, warn};

use crate::{
    backend::{Auth, OtpType},
    dashboard,
    db::Db,
    include_res, res,
    session::Lifecycle,
    AppResult, AppState,
};

use super::local_path;

pub const AUTH_ERROR: &str = "/auth/auth-code-error";

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub token_hash: Option<String>,
    pub r#type: Option<String>,
    pub next: Option<String>,
}

/// Redeems an emailed token and signs the browser in.
#[debug_handler(state = AppState)]
pub(crate) async fn callback(
    Query(CallbackQuery { token_hash, r#type, next }): Query<CallbackQuery>,
    State(auth): State<Arc<dyn Auth>>,
    State(db): State<Db>,
    session: Session,
) -> AppResult<Redirect> {
    let next = local_path(next.as_deref(), "/dashboard");

    let (Some(token_hash), Some(kind)) = (token_hash, r#type) else {
        warn!("callback without token or type");
        return Ok(Redirect::to(AUTH_ERROR));
    };
    let Ok(kind) = kind.parse::<OtpType>() else {
        warn!(%kind, "callback with unknown token type");
        return Ok(Redirect::to(AUTH_ERROR));
    };

    match auth.verify_otp(&token_hash, kind).await {
        Ok(identity) => {
            Lifecycle::load(session).await?.redeemed(&identity).await?;
            dashboard::ensure_profile(&db, &identity).await;
            info!(user = %identity.id, kind = kind.as_str(), "signed in from emailed link");
            Ok(Redirect::to(&next))
        }
        Err(err) => {
            warn!(error = %err, "token redemption failed");
            Ok(Redirect::to(AUTH_ERROR))
        }
    }
}

#[debug_handler]
pub(crate) async fn error_page() -> impl IntoResponse {
    res::page("Authentication error", include_res!(str, "/pages/auth_error.html"))
}
