use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    backend::{Direction, Filter, Identity, Query},
    db::Db,
    fmt::{escape_html, initial, markdown, time_ago},
    include_res,
    realtime::EventMask,
    reconcile::{LocalList, Placement},
    records::{validate_text, NewPost, Post, FEED_LIMIT, MAX_POST_CHARS},
    res,
};

use super::ws::{Outbound, Outbox};

/// Element id of the post list.
pub(crate) const POSTS: &str = "posts";

fn snapshot() -> Query {
    Query::new().order("created_at", Direction::Desc).limit(FEED_LIMIT)
}

pub(crate) fn post_html(post: &Post, viewer: &Identity, now: DateTime<Utc>) -> String {
    let id = post.id.to_string();
    let delete = if post.user_id == viewer.id {
        res::fill(include_res!(str, "/pages/delete_post.html"), &[("id", &id)])
    } else {
        String::new()
    };

    res::fill(
        include_res!(str, "/pages/post.html"),
        &[
            ("id", &id),
            ("initial", &escape_html(&initial(&post.username))),
            ("username", &escape_html(&post.username)),
            ("created_at", &post.created_at.to_rfc3339()),
            ("ago", &time_ago(now, post.created_at)),
            ("delete", &delete),
            ("content", &markdown(&post.content)),
        ],
    )
}

fn list_html<'a>(posts: impl Iterator<Item = &'a Post>, viewer: &Identity) -> String {
    let now = Utc::now();
    let html: String = posts.map(|post| post_html(post, viewer, now)).collect();
    if html.is_empty() {
        include_res!(str, "/pages/feed_empty.html").to_owned()
    } else {
        html
    }
}

pub(crate) async fn render(db: &Db, user: &Identity) -> String {
    let posts: Vec<Post> = db.list(&snapshot()).await;
    res::fill(
        include_res!(str, "/pages/feed.html"),
        &[
            ("max", &MAX_POST_CHARS.to_string()),
            ("initial", &escape_html(&initial(user.display_name()))),
            ("posts", &list_html(posts.iter(), user)),
        ],
    )
}

/// Keeps a mounted feed in step with post inserts and deletes.
pub(crate) async fn stream(db: Db, user: Identity, outbox: Outbox) {
    let mut changes = db.subscribe::<Post>(EventMask::ALL);
    let mut posts = LocalList::new(Placement::Prepend, db.list::<Post>(&snapshot()).await);

    let reset = Outbound::Reset {
        target: POSTS,
        html: list_html(posts.items(), &user),
    };
    if outbox.send(reset).await.is_err() {
        return;
    }

    while let Some(change) = changes.next().await {
        let Some(applied) = posts.apply(change) else {
            continue;
        };
        let now = Utc::now();
        let op = Outbound::applied(POSTS, posts.placement(), applied, |post| post_html(post, &user, now));
        if outbox.send(op).await.is_err() {
            break;
        }
    }
    changes.unsubscribe();
}

pub(crate) async fn create(db: &Db, user: &Identity, content: &str) -> Option<Post> {
    let content = match validate_text(content, MAX_POST_CHARS) {
        Ok(content) => content,
        Err(err) => {
            warn!(user = %user.id, error = %err, "post dropped");
            return None;
        }
    };

    let post: Option<Post> = db
        .insert(&NewPost {
            content: content.to_owned(),
            user_id: user.id,
            username: user.display_name().to_owned(),
        })
        .await;
    if let Some(post) = &post {
        info!(post = %post.id, user = %user.id, "post created");
    }
    post
}

/// Deletes `id` only if `user` wrote it.
pub(crate) async fn delete(db: &Db, user: &Identity, id: Uuid) -> Vec<Post> {
    let removed: Vec<Post> = db
        .delete_where(&Filter::new().eq("id", id).eq("user_id", user.id))
        .await;
    if removed.is_empty() {
        warn!(post = %id, user = %user.id, "nothing deleted, post missing or not owned");
    }
    removed
}
