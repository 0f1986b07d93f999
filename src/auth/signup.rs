use std::sync::Arc;

use axum::{
    debug_handler,
    extract::State,
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::warn;

use crate::{
    backend::Auth, config::Config, fmt::escape_html, include_res, records::MIN_PASSWORD_CHARS, res,
    session::Lifecycle, AppResult, AppState,
};

use super::Notice;

#[derive(Deserialize)]
pub(crate) struct SignUpForm {
    email: String,
    password: String,
    username: String,
}

fn render(email: &str, username: &str, notice: Notice) -> Html<String> {
    res::page(
        "Sign up",
        &res::fill(
            include_res!(str, "/pages/signup.html"),
            &[
                ("email", &escape_html(email)),
                ("username", &escape_html(username)),
                ("min_password", &MIN_PASSWORD_CHARS.to_string()),
                ("notice", &notice.html()),
            ],
        ),
    )
}

#[debug_handler]
pub(crate) async fn signup_page() -> impl IntoResponse {
    render("", "", Notice::None)
}

#[debug_handler(state = AppState)]
pub(crate) async fn sign_up(
    State(auth): State<Arc<dyn Auth>>,
    State(config): State<Arc<Config>>,
    session: Session,
    Form(SignUpForm { email, password, username }): Form<SignUpForm>,
) -> AppResult<Response> {
    let mut lifecycle = Lifecycle::load(session).await?;
    if !lifecycle.begin() {
        return Ok(Redirect::to("/dashboard").into_response());
    }

    match auth.sign_up(&email, &password, &username, &config.callback_url()).await {
        Ok(()) => {
            lifecycle.link_sent().await?;
            Ok(render("", "", Notice::Info("Check your email for the confirmation link!")).into_response())
        }
        Err(err) => {
            lifecycle.rejected().await?;
            warn!(error = %err, "sign-up rejected");
            Ok(render(&email, &username, Notice::Error(&err.user_message())).into_response())
        }
    }
}
