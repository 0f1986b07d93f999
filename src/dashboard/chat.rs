use tracing::{debug, info, warn};

use crate::{
    backend::{Direction, Identity, Query},
    db::Db,
    fmt::{escape_html, initial},
    include_res,
    realtime::{EventMask, PresenceEvent},
    reconcile::{LocalList, Placement},
    records::{validate_text, ChatMessage, NewChatMessage, CHAT_LIMIT, MAX_MESSAGE_CHARS},
    res,
};

use super::{
    presence::{entry_for, Roster, CHAT_PRESENCE},
    ws::{Outbound, Outbox},
};

/// Element id of the message list.
pub(crate) const MESSAGES: &str = "messages";
/// Element id of the presence header.
pub(crate) const ONLINE: &str = "online";

fn snapshot() -> Query {
    Query::new().order("created_at", Direction::Asc).limit(CHAT_LIMIT)
}

pub(crate) fn message_html(message: &ChatMessage, viewer: &Identity) -> String {
    let own = if message.user_id == viewer.id { "own" } else { "" };
    res::fill(
        include_res!(str, "/pages/message.html"),
        &[
            ("id", &message.id.to_string()),
            ("own", own),
            ("initial", &escape_html(&initial(&message.username))),
            ("username", &escape_html(&message.username)),
            ("created_at", &message.created_at.to_rfc3339()),
            ("time", &message.created_at.format("%H:%M").to_string()),
            ("message", &escape_html(&message.message)),
        ],
    )
}

fn list_html<'a>(messages: impl Iterator<Item = &'a ChatMessage>, viewer: &Identity) -> String {
    let html: String = messages.map(|message| message_html(message, viewer)).collect();
    if html.is_empty() {
        include_res!(str, "/pages/chat_empty.html").to_owned()
    } else {
        html
    }
}

pub(crate) async fn render(db: &Db, user: &Identity) -> String {
    let messages: Vec<ChatMessage> = db.list(&snapshot()).await;
    let roster = Roster::from_entries(&db.presence_channel(CHAT_PRESENCE).state());

    res::fill(
        include_res!(str, "/pages/chat.html"),
        &[
            ("max", &MAX_MESSAGE_CHARS.to_string()),
            ("online", &roster.html()),
            ("messages", &list_html(messages.iter(), user)),
        ],
    )
}

/// Keeps a mounted chat in step with new messages and who is present.
pub(crate) async fn stream(db: Db, user: Identity, outbox: Outbox) {
    let mut changes = db.subscribe::<ChatMessage>(EventMask::INSERT);
    let channel = db.presence_channel(CHAT_PRESENCE);
    let mut presence = channel.subscribe();
    let mut messages = LocalList::new(Placement::Append, db.list::<ChatMessage>(&snapshot()).await);

    let reset = Outbound::Reset {
        target: MESSAGES,
        html: list_html(messages.items(), &user),
    };
    if outbox.send(reset).await.is_err() {
        return;
    }
    let _tracked = channel.track(entry_for(&user));

    loop {
        let op = tokio::select! {
            change = changes.next() => {
                let Some(change) = change else { break };
                let Some(applied) = messages.apply(change) else { continue };
                Outbound::applied(MESSAGES, messages.placement(), applied, |message| message_html(message, &user))
            }
            event = presence.recv() => match event {
                Some(PresenceEvent::Sync(entries)) => {
                    let roster = Roster::from_entries(&entries);
                    Outbound::Online { target: ONLINE, count: roster.count(), html: roster.html() }
                }
                Some(PresenceEvent::Join(entry)) => {
                    debug!(user = %entry.id, "joined chat");
                    continue;
                }
                Some(PresenceEvent::Leave(entry)) => {
                    debug!(user = %entry.id, "left chat");
                    continue;
                }
                None => break,
            },
        };
        if outbox.send(op).await.is_err() {
            break;
        }
    }
}

pub(crate) async fn send(db: &Db, user: &Identity, message: &str) -> Option<ChatMessage> {
    let message = match validate_text(message, MAX_MESSAGE_CHARS) {
        Ok(message) => message,
        Err(err) => {
            warn!(user = %user.id, error = %err, "chat message dropped");
            return None;
        }
    };

    let sent: Option<ChatMessage> = db
        .insert(&NewChatMessage {
            message: message.to_owned(),
            user_id: user.id,
            username: user.display_name().to_owned(),
        })
        .await;
    if let Some(sent) = &sent {
        info!(message = %sent.id, user = %user.id, "chat message sent");
    }
    sent
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::backend::{memory_pool, SqliteStore};

    async fn db() -> Db {
        let store = SqliteStore::new(memory_pool().await.unwrap());
        store.migrate().await.unwrap();
        Db::new(Arc::new(store))
    }

    fn user(name: &str) -> Identity {
        Identity {
            id: Uuid::now_v7(),
            email: format!("{name}@example.com"),
            username: Some(name.to_owned()),
        }
    }

    async fn next_online(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> (usize, String) {
        loop {
            match rx.recv().await {
                Some(Outbound::Online { count, html, .. }) => return (count, html),
                Some(_) => {}
                None => panic!("outbox closed"),
            }
        }
    }

    #[tokio::test]
    async fn two_viewers_see_each_other() {
        let db = db().await;
        let (ann, bo) = (user("ann"), user("bo"));

        let (ann_out, mut ann_rx) = tokio::sync::mpsc::channel(16);
        let ann_task = tokio::spawn(stream(db.clone(), ann.clone(), ann_out));
        assert_eq!(next_online(&mut ann_rx).await.0, 1);

        let (bo_out, _bo_rx) = tokio::sync::mpsc::channel(16);
        let bo_task = tokio::spawn(stream(db.clone(), bo.clone(), bo_out));

        let (count, html) = next_online(&mut ann_rx).await;
        assert_eq!(count, 2);
        assert!(html.contains("2 people online"));
        assert!(html.contains(r#"title="ann""#));
        assert!(html.contains(r#"title="bo""#));

        bo_task.abort();
        let _ = bo_task.await;
        assert_eq!(next_online(&mut ann_rx).await.0, 1);

        ann_task.abort();
    }

    #[tokio::test]
    async fn messages_append_in_order() {
        let db = db().await;
        let ann = user("ann");
        send(&db, &ann, "one").await.unwrap();

        let (outbox, mut rx) = tokio::sync::mpsc::channel(16);
        let task = tokio::spawn(stream(db.clone(), ann.clone(), outbox));

        let Some(Outbound::Reset { html, .. }) = rx.recv().await else {
            panic!("expected a reset");
        };
        assert!(html.contains("one"));
        assert!(html.contains("message own"));

        let two = send(&db, &ann, "two").await.unwrap();
        loop {
            match rx.recv().await {
                Some(Outbound::Append { id, target, .. }) => {
                    assert_eq!(id, two.id);
                    assert_eq!(target, MESSAGES);
                    break;
                }
                Some(Outbound::Online { .. }) => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        task.abort();
    }

    #[test]
    fn message_text_is_escaped() {
        let ann = user("ann");
        let message = ChatMessage {
            id: Uuid::now_v7(),
            message: "<img src=x>".to_owned(),
            user_id: Uuid::now_v7(),
            username: "bo".to_owned(),
            created_at: Utc::now(),
        };
        let html = message_html(&message, &ann);
        assert!(html.contains("&lt;img src=x&gt;"));
        assert!(!html.contains("message own"));
    }
}
