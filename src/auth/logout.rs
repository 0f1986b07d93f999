use axum::{debug_handler, extract::Query, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{session::Lifecycle, AppResult};

use super::local_path;

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    pub(crate) return_url: Option<String>,
}

#[debug_handler]
pub(crate) async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    session: Session,
) -> AppResult<Redirect> {
    Lifecycle::load(session).await?.sign_out().await?;
    info!("signed out");
    Ok(Redirect::to(&local_path(return_url.as_deref(), "/login")))
}
