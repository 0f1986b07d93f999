//! Writes coming from the browser, over a view socket or a plain form.

use axum::{
    debug_handler,
    extract::{Path, State},
    response::Redirect,
    Form,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::{backend::Identity, db::Db, session::CurrentUser, AppState};

use super::{chat, feed, profile};

#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum Action {
    CreatePost { content: String },
    DeletePost { id: Uuid },
    SendMessage { message: String },
}

pub(crate) async fn perform(db: &Db, user: &Identity, action: Action) {
    match action {
        Action::CreatePost { content } => {
            feed::create(db, user, &content).await;
        }
        Action::DeletePost { id } => {
            feed::delete(db, user, id).await;
        }
        Action::SendMessage { message } => {
            chat::send(db, user, &message).await;
        }
    }
}

/// Handles one text frame from a view socket.
pub(crate) async fn dispatch(db: &Db, user: &Identity, frame: &str) {
    match serde_json::from_str::<Action>(frame) {
        Ok(action) => perform(db, user, action).await,
        Err(err) => warn!(user = %user.id, error = %err, "ignoring malformed socket frame"),
    }
}

#[derive(Deserialize)]
pub(crate) struct PostForm {
    content: String,
}

#[derive(Deserialize)]
pub(crate) struct MessageForm {
    message: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create_post(
    State(db): State<Db>,
    CurrentUser(user): CurrentUser,
    Form(PostForm { content }): Form<PostForm>,
) -> Redirect {
    perform(&db, &user, Action::CreatePost { content }).await;
    Redirect::to("/dashboard/feed")
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_post(
    Path(id): Path<Uuid>,
    State(db): State<Db>,
    CurrentUser(user): CurrentUser,
) -> Redirect {
    perform(&db, &user, Action::DeletePost { id }).await;
    Redirect::to("/dashboard/feed")
}

#[debug_handler(state = AppState)]
pub(crate) async fn send_message(
    State(db): State<Db>,
    CurrentUser(user): CurrentUser,
    Form(MessageForm { message }): Form<MessageForm>,
) -> Redirect {
    perform(&db, &user, Action::SendMessage { message }).await;
    Redirect::to("/dashboard/chat")
}

#[debug_handler(state = AppState)]
pub(crate) async fn save_profile(
    State(db): State<Db>,
    CurrentUser(user): CurrentUser,
    Form(form): Form<profile::ProfileForm>,
) -> Redirect {
    profile::save(&db, &user, &form).await;
    Redirect::to("/dashboard/profile")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socket_actions() {
        let action: Action = serde_json::from_str(r#"{"action":"send_message","message":"hi"}"#).unwrap();
        assert_eq!(action, Action::SendMessage { message: "hi".to_owned() });

        let action: Action =
            serde_json::from_str(r#"{"action":"delete_post","id":"0190b3e2-7a3c-7cc0-8000-000000000001"}"#).unwrap();
        assert!(matches!(action, Action::DeletePost { .. }));

        assert!(serde_json::from_str::<Action>(r#"{"action":"drop_table"}"#).is_err());
    }
}
