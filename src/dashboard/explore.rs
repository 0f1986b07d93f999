use chrono::{DateTime, TimeZone, Utc};

use crate::{
    backend::{timestamp, Direction, Filter, Query},
    db::Db,
    fmt::{escape_html, initial, joined, markdown, time_ago},
    include_res,
    records::{Post, Profile, RECENT_PROFILES, TRENDING_POSTS},
    res,
};

use super::ONLINE_USERS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stats {
    pub(crate) total_posts: u64,
    pub(crate) total_users: u64,
    pub(crate) posts_today: u64,
    pub(crate) online_users: usize,
}

fn midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map_or(now, |naive| Utc.from_utc_datetime(&naive))
}

pub(crate) async fn stats(db: &Db, now: DateTime<Utc>) -> Stats {
    let everything = Filter::new();
    let today = Filter::new().gte("created_at", timestamp(midnight(now)));
    let (total_posts, total_users, posts_today) = tokio::join!(
        db.count::<Post>(&everything),
        db.count::<Profile>(&everything),
        db.count::<Post>(&today),
    );

    Stats {
        total_posts,
        total_users,
        posts_today,
        online_users: db.presence_channel(ONLINE_USERS).distinct_users(),
    }
}

fn profile_card(profile: &Profile) -> String {
    format!(
        r#"<div class="profile-card"><span class="avatar">{}</span><div><strong>{}</strong><small>Joined {}</small></div></div>"#,
        escape_html(&initial(&profile.username)),
        escape_html(&profile.username),
        joined(profile.created_at),
    )
}

fn trending_post(post: &Post, now: DateTime<Utc>) -> String {
    format!(
        r#"<article class="post compact"><header><strong>{}</strong><time>{}</time></header><div class="content">{}</div></article>"#,
        escape_html(&post.username),
        time_ago(now, post.created_at),
        markdown(&post.content),
    )
}

pub(crate) async fn render(db: &Db) -> String {
    let now = Utc::now();
    let recent = Query::new().order("created_at", Direction::Desc).limit(RECENT_PROFILES);
    let trending = Query::new().order("created_at", Direction::Desc).limit(TRENDING_POSTS);
    let (stats, profiles, posts) = tokio::join!(
        stats(db, now),
        db.list::<Profile>(&recent),
        db.list::<Post>(&trending),
    );

    let profiles: String = profiles.iter().map(profile_card).collect();
    let posts: String = posts.iter().map(|post| trending_post(post, now)).collect();

    res::fill(
        include_res!(str, "/pages/explore.html"),
        &[
            ("total_posts", &stats.total_posts.to_string()),
            ("total_users", &stats.total_users.to_string()),
            ("posts_today", &stats.posts_today.to_string()),
            ("online_users", &stats.online_users.to_string()),
            ("profiles", &profiles),
            ("posts", &posts),
        ],
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::{
        backend::{memory_pool, Identity, SqliteStore},
        dashboard::{ensure_profile, presence::entry_for},
    };

    #[test]
    fn midnight_is_utc_day_start() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 17, 45, 12).unwrap();
        assert_eq!(midnight(now), Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn counts_today_and_online() {
        let store = SqliteStore::new(memory_pool().await.unwrap());
        store.migrate().await.unwrap();
        let db = Db::new(Arc::new(store));

        let ann = Identity {
            id: Uuid::now_v7(),
            email: "ann@example.com".to_owned(),
            username: Some("ann".to_owned()),
        };
        ensure_profile(&db, &ann).await;

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        for at in ["2024-03-09T23:59:59.000000Z", "2024-03-10T00:00:00.000000Z", "2024-03-10T11:00:00.000000Z"] {
            let _: Option<Post> = db
                .insert(&json!({ "content": "x", "user_id": ann.id, "username": "ann", "created_at": at }))
                .await;
        }

        let channel = db.presence_channel(ONLINE_USERS);
        let _first_tab = channel.track(entry_for(&ann));
        let _second_tab = channel.track(entry_for(&ann));

        let stats = stats(&db, now).await;
        assert_eq!(
            stats,
            Stats { total_posts: 3, total_users: 1, posts_today: 2, online_users: 1 }
        );
    }

    #[tokio::test]
    async fn render_lists_members_and_latest_posts() {
        let store = SqliteStore::new(memory_pool().await.unwrap());
        store.migrate().await.unwrap();
        let db = Db::new(Arc::new(store));

        let bo = Identity {
            id: Uuid::now_v7(),
            email: "bo@example.com".to_owned(),
            username: Some("bo".to_owned()),
        };
        ensure_profile(&db, &bo).await;
        let _: Option<Post> = db
            .insert(&json!({ "content": "*hello*", "user_id": bo.id, "username": "bo" }))
            .await;

        let html = render(&db).await;
        assert!(html.contains("<strong>bo</strong>"));
        assert!(html.contains("<em>hello</em>"));
        assert!(html.contains("<strong>1</strong><span>Total posts</span>"));
    }
}
