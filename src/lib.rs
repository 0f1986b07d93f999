pub mod auth;
pub mod backend;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod fmt;
pub mod realtime;
pub mod reconcile;
pub mod records;
pub mod res;
pub mod session;

use std::sync::Arc;

use axum::{
    debug_handler,
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, Session, SessionManagerLayer};
use tracing::error;

use backend::{Auth, AuthError, StoreError};
use config::Config;
use db::Db;
use session::IDENTITY;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db: Db,
    pub auth: Arc<dyn Auth>,
    pub config: Arc<Config>,
}

/// Builds the full application router, session layer included.
pub fn app(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(state.config.secure_cookies)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            state.config.session_idle_minutes,
        )));

    Router::new()
        .route("/", get(index))
        .route("/static/app.js", get(res::script))
        .route("/static/style.css", get(res::stylesheet))
        .route("/posts", post(dashboard::create_post))
        .route("/posts/{id}/delete", post(dashboard::delete_post))
        .route("/messages", post(dashboard::send_message))
        .route("/profile", post(dashboard::save_profile))
        .merge(auth::router())
        .nest("/dashboard", dashboard::router())
        .with_state(state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
}

#[debug_handler]
async fn index(session: Session) -> AppResult<Redirect> {
    if session.get::<backend::Identity>(IDENTITY).await?.is_some() {
        Ok(Redirect::to("/dashboard"))
    } else {
        Ok(Redirect::to("/login"))
    }
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", self.0)).into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(tower_sessions::session::Error);
apperr_impl!(axum::Error);
apperr_impl!(StoreError);
apperr_impl!(AuthError);
