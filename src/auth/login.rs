use std::sync::Arc;

use axum::{
    debug_handler,
    extract::State,
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, warn};

use crate::{
    backend::Auth, config::Config, dashboard, db::Db, fmt::escape_html, include_res, res,
    session::Lifecycle, AppResult, AppState,
};

use super::Notice;

#[derive(Deserialize)]
pub(crate) struct SignInForm {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub(crate) struct MagicLinkForm {
    email: String,
}

pub(crate) fn render(email: &str, notice: Notice) -> Html<String> {
    res::page(
        "Sign in",
        &res::fill(
            include_res!(str, "/pages/login.html"),
            &[("email", &escape_html(email)), ("notice", &notice.html())],
        ),
    )
}

#[debug_handler]
pub(crate) async fn login_page() -> impl IntoResponse {
    render("", Notice::None)
}

#[debug_handler(state = AppState)]
pub(crate) async fn sign_in(
    State(auth): State<Arc<dyn Auth>>,
    State(db): State<Db>,
    session: Session,
    Form(SignInForm { email, password }): Form<SignInForm>,
) -> AppResult<Response> {
    let mut lifecycle = Lifecycle::load(session).await?;
    if !lifecycle.begin() {
        return Ok(Redirect::to("/dashboard").into_response());
    }

    match auth.sign_in_with_password(&email, &password).await {
        Ok(identity) => {
            lifecycle.confirmed(&identity).await?;
            dashboard::ensure_profile(&db, &identity).await;
            info!(user = %identity.id, "signed in with password");
            Ok(Redirect::to("/dashboard").into_response())
        }
        Err(err) => {
            lifecycle.rejected().await?;
            warn!(error = %err, "password sign-in rejected");
            Ok(render(&email, Notice::Error(&err.user_message())).into_response())
        }
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn magic_link(
    State(auth): State<Arc<dyn Auth>>,
    State(config): State<Arc<Config>>,
    session: Session,
    Form(MagicLinkForm { email }): Form<MagicLinkForm>,
) -> AppResult<Response> {
    let mut lifecycle = Lifecycle::load(session).await?;
    if !lifecycle.begin() {
        return Ok(Redirect::to("/dashboard").into_response());
    }

    match auth.sign_in_with_otp(&email, &config.callback_url()).await {
        Ok(()) => {
            lifecycle.link_sent().await?;
            Ok(render(&email, Notice::Info("Check your email for the login link!")).into_response())
        }
        Err(err) => {
            lifecycle.rejected().await?;
            warn!(error = %err, "magic link request rejected");
            Ok(render(&email, Notice::Error(&err.user_message())).into_response())
        }
    }
}
