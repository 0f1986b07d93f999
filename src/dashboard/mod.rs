mod actions;
mod chat;
mod explore;
mod feed;
mod presence;
mod profile;
mod ws;

use axum::{
    debug_handler,
    extract::{Path, State},
    response::Html,
    routing::get,
    Router,
};

use crate::{backend::Identity, db::Db, fmt::escape_html, include_res, res, session::CurrentUser, AppState};

pub(crate) use actions::{create_post, delete_post, save_profile, send_message};
pub use presence::{Roster, CHAT_PRESENCE, ONLINE_USERS};
pub use profile::ensure_profile;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/{view}", get(view_page))
        .route("/{view}/ws", get(ws::view_ws))
}

/// The four dashboard panels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Feed,
    Explore,
    Chat,
    Profile,
}

impl View {
    pub const ALL: [View; 4] = [View::Feed, View::Explore, View::Chat, View::Profile];

    /// Unknown slugs land on the feed.
    pub fn from_slug(slug: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|view| view.slug() == slug)
            .unwrap_or_default()
    }

    pub fn slug(self) -> &'static str {
        match self {
            View::Feed => "feed",
            View::Explore => "explore",
            View::Chat => "chat",
            View::Profile => "profile",
        }
    }

    fn title(self) -> &'static str {
        match self {
            View::Feed => "Feed",
            View::Explore => "Explore",
            View::Chat => "Chat",
            View::Profile => "Profile",
        }
    }

    fn blurb(self) -> &'static str {
        match self {
            View::Feed => "Latest posts",
            View::Explore => "Discover content",
            View::Chat => "Global chat",
            View::Profile => "Your profile",
        }
    }
}

fn nav(active: View) -> String {
    View::ALL
        .into_iter()
        .map(|view| {
            let class = if view == active { "nav-item active" } else { "nav-item" };
            format!(
                r#"<a class="{class}" href="/dashboard/{slug}"><strong>{title}</strong><small>{blurb}</small></a>"#,
                slug = view.slug(),
                title = view.title(),
                blurb = view.blurb(),
            )
        })
        .collect()
}

async fn shell(db: &Db, user: &Identity, view: View) -> Html<String> {
    let panel = match view {
        View::Feed => feed::render(db, user).await,
        View::Explore => explore::render(db).await,
        View::Chat => chat::render(db, user).await,
        View::Profile => profile::render(db, user).await,
    };

    res::page(
        view.title(),
        &res::fill(
            include_res!(str, "/pages/dashboard.html"),
            &[
                ("nav", &nav(view)),
                ("view", view.slug()),
                ("user", &escape_html(user.display_name())),
                ("panel", &panel),
            ],
        ),
    )
}

#[debug_handler(state = AppState)]
async fn dashboard(State(db): State<Db>, CurrentUser(user): CurrentUser) -> Html<String> {
    shell(&db, &user, View::Feed).await
}

#[debug_handler(state = AppState)]
async fn view_page(
    Path(slug): Path<String>,
    State(db): State<Db>,
    CurrentUser(user): CurrentUser,
) -> Html<String> {
    shell(&db, &user, View::from_slug(&slug)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_round_trip_and_fall_back() {
        for view in View::ALL {
            assert_eq!(View::from_slug(view.slug()), view);
        }
        assert_eq!(View::from_slug("settings"), View::Feed);
        assert_eq!(View::from_slug(""), View::Feed);
    }

    #[test]
    fn nav_marks_active_view() {
        let html = nav(View::Chat);
        assert!(html.contains(r#"<a class="nav-item active" href="/dashboard/chat">"#));
        assert_eq!(html.matches("nav-item active").count(), 1);
    }

    #[tokio::test]
    async fn shell_carries_theme_toggle_and_char_counted_composer() {
        use std::sync::Arc;

        use crate::backend::{memory_pool, SqliteStore};

        let store = SqliteStore::new(memory_pool().await.unwrap());
        store.migrate().await.unwrap();
        let db = Db::new(Arc::new(store));
        let ann = Identity {
            id: uuid::Uuid::now_v7(),
            email: "ann@example.com".to_owned(),
            username: Some("ann".to_owned()),
        };

        let Html(page) = shell(&db, &ann, View::Feed).await;
        assert!(page.contains("data-theme-toggle"));
        assert!(page.contains(r#"localStorage.getItem("theme")"#));
        assert!(page.contains(r#"data-max="500""#));
        assert!(!page.contains("maxlength"));
    }
}
