use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    backend::Identity,
    db::Db,
    reconcile::{Applied, Placement},
    records::Record,
    session::CurrentUser,
    AppState,
};

use super::{actions, chat, feed, presence, View, ONLINE_USERS};

const OUTBOX_CAPACITY: usize = 64;

/// A DOM operation for the browser, addressed by element id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Outbound {
    Reset { target: &'static str, html: String },
    Prepend { target: &'static str, id: Uuid, html: String },
    Append { target: &'static str, id: Uuid, html: String },
    Replace { target: &'static str, id: Uuid, html: String },
    Remove { target: &'static str, id: Uuid },
    Online { target: &'static str, count: usize, html: String },
}

impl Outbound {
    pub(crate) fn applied<T: Record>(
        target: &'static str,
        placement: Placement,
        applied: Applied<T>,
        render: impl Fn(&T) -> String,
    ) -> Self {
        match applied {
            Applied::Placed(item) => match placement {
                Placement::Prepend => Outbound::Prepend { target, id: item.id(), html: render(&item) },
                Placement::Append => Outbound::Append { target, id: item.id(), html: render(&item) },
            },
            Applied::Replaced(item) => Outbound::Replace { target, id: item.id(), html: render(&item) },
            Applied::Removed(id) => Outbound::Remove { target, id },
        }
    }
}

pub(crate) type Outbox = mpsc::Sender<Outbound>;

#[debug_handler(state = AppState)]
pub(crate) async fn view_ws(
    Path(slug): Path<String>,
    State(db): State<Db>,
    CurrentUser(user): CurrentUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let view = View::from_slug(&slug);
    ws.on_upgrade(move |socket| mount(view, db, user, socket))
}

/// Runs one mounted view until the browser goes away.
async fn mount(view: View, db: Db, user: Identity, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut rx) = mpsc::channel::<Outbound>(OUTBOX_CAPACITY);
    debug!(view = view.slug(), user = %user.id, "view mounted");

    let online = db.presence_channel(ONLINE_USERS).track(presence::entry_for(&user));

    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let text = match serde_json::to_string(&outbound) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "unserializable view operation");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut view_task = tokio::spawn(stream(view, db.clone(), user.clone(), outbox));

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => actions::dispatch(&db, &user, text.as_str()).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut send_task => break,
        }
    }

    view_task.abort();
    send_task.abort();
    let _ = (&mut view_task).await;
    drop(online);
    debug!(view = view.slug(), user = %user.id, "view unmounted");
}

/// Pushes a view's live updates into its outbox. Returns when the view has
/// nothing live to show or the outbox is closed.
async fn stream(view: View, db: Db, user: Identity, outbox: Outbox) {
    match view {
        View::Feed => feed::stream(db, user, outbox).await,
        View::Chat => chat::stream(db, user, outbox).await,
        // the outbox stays open so the socket lives on
        View::Profile | View::Explore => outbox.closed().await,
    }
}
