use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    backend::{Direction, Identity, Query},
    db::Db,
    fmt::{escape_html, initial, joined, markdown, time_ago},
    include_res,
    records::{validate_optional, Post, Profile, ProfileUpsert, MAX_BIO_CHARS},
    res,
};

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileForm {
    pub(crate) username: String,
    #[serde(default)]
    pub(crate) bio: String,
    #[serde(default)]
    pub(crate) website: String,
}

/// Creates the caller's profile on first sign-in.
pub async fn ensure_profile(db: &Db, identity: &Identity) {
    if db.find::<Profile>(identity.id).await.is_some() {
        return;
    }

    let created: Option<Profile> = db
        .insert(&ProfileUpsert {
            id: identity.id,
            username: identity.display_name().to_owned(),
            bio: None,
            website: None,
        })
        .await;
    if created.is_some() {
        info!(user = %identity.id, "profile created");
    }
}

/// `https://` is assumed when no scheme is given.
fn normalize_website(website: &str) -> Option<String> {
    let website = website.trim();
    if website.is_empty() {
        None
    } else if website.starts_with("http://") || website.starts_with("https://") {
        Some(website.to_owned())
    } else {
        Some(format!("https://{website}"))
    }
}

fn website_html(website: Option<&str>) -> String {
    match website {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
            let url = escape_html(url);
            format!(r#"<a class="website" href="{url}" rel="noopener noreferrer" target="_blank">{url}</a>"#)
        }
        _ => String::new(),
    }
}

fn own_post_html(post: &Post, now: chrono::DateTime<Utc>) -> String {
    format!(
        r#"<article class="post compact" data-id="{}"><div class="content">{}</div><time>{}</time></article>"#,
        post.id,
        markdown(&post.content),
        time_ago(now, post.created_at)
    )
}

pub(crate) async fn render(db: &Db, user: &Identity) -> String {
    let own_posts = Query::new().eq("user_id", user.id).order("created_at", Direction::Desc);
    let (profile, posts) = tokio::join!(db.find::<Profile>(user.id), db.list::<Post>(&own_posts));

    let now = Utc::now();
    let username = profile
        .as_ref()
        .map_or(user.display_name(), |profile| profile.username.as_str());
    let bio = profile.as_ref().and_then(|profile| profile.bio.as_deref()).unwrap_or("");
    let website = profile.as_ref().and_then(|profile| profile.website.as_deref());
    let since = profile.as_ref().map_or(now, |profile| profile.created_at);

    let post_list: String = posts.iter().map(|post| own_post_html(post, now)).collect();
    let post_list = if post_list.is_empty() {
        r#"<p class="empty">No posts yet.</p>"#.to_owned()
    } else {
        post_list
    };

    res::fill(
        include_res!(str, "/pages/profile.html"),
        &[
            ("initial", &escape_html(&initial(username))),
            ("username", &escape_html(username)),
            ("email", &escape_html(&user.email)),
            ("bio", &escape_html(bio)),
            ("website_link", &website_html(website)),
            ("website", &escape_html(website.unwrap_or(""))),
            ("joined", &joined(since)),
            ("post_count", &posts.len().to_string()),
            ("max_bio", &MAX_BIO_CHARS.to_string()),
            ("posts", &post_list),
        ],
    )
}

pub(crate) async fn save(db: &Db, user: &Identity, form: &ProfileForm) -> Option<Profile> {
    let bio = match validate_optional(&form.bio, MAX_BIO_CHARS) {
        Ok(bio) => bio.map(str::to_owned),
        Err(err) => {
            warn!(user = %user.id, error = %err, "profile update dropped");
            return None;
        }
    };
    let username = match form.username.trim() {
        "" => user.display_name(),
        username => username,
    };

    let saved: Option<Profile> = db
        .upsert(&ProfileUpsert {
            id: user.id,
            username: username.to_owned(),
            bio,
            website: normalize_website(&form.website),
        })
        .await;
    if saved.is_some() {
        info!(user = %user.id, "profile saved");
    }
    saved
}
