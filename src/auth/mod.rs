use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

mod callback;
mod login;
mod logout;
mod signup;

pub use callback::AUTH_ERROR;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login::login_page).post(login::sign_in))
        .route("/login/magic", post(login::magic_link))
        .route("/signup", get(signup::signup_page).post(signup::sign_up))
        .route("/auth/callback", get(callback::callback))
        .route(AUTH_ERROR, get(callback::error_page))
        .route("/logout", post(logout::logout))
}

/// A message shown above an auth form.
pub(crate) enum Notice<'a> {
    None,
    Info(&'a str),
    Error(&'a str),
}

impl Notice<'_> {
    pub(crate) fn html(&self) -> String {
        match self {
            Notice::None => String::new(),
            Notice::Info(text) => format!(r#"<p class="notice">{}</p>"#, crate::fmt::escape_html(text)),
            Notice::Error(text) => format!(r#"<p class="notice error">{}</p>"#, crate::fmt::escape_html(text)),
        }
    }
}

/// `path` when it is a local absolute path, otherwise `fallback`.
///
/// Browsers drop tabs and newlines from URLs, so any whitespace or control
/// character could turn `/\t/host` into `//host`.
pub(crate) fn local_path(path: Option<&str>, fallback: &str) -> String {
    match path {
        Some(path) if is_local(path) => path.to_owned(),
        _ => fallback.to_owned(),
    }
}

fn is_local(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && !path.chars().any(|c| c.is_control() || c.is_whitespace())
}
