use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::StreamExt;
use murmur::{
    backend::{memory_pool, Filter, MemoryMailer, SqliteAuth, SqliteStore},
    config::Config,
    dashboard::ONLINE_USERS,
    db::Db,
    records::Post,
    AppState,
};
use reqwest::{
    header::{COOKIE, LOCATION, SET_COOKIE},
    redirect::Policy,
    Client, StatusCode,
};
use serde_json::Value;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};

struct TestApp {
    addr: SocketAddr,
    mailer: Arc<MemoryMailer>,
    db: Db,
}

impl TestApp {
    async fn spawn() -> Self {
        let pool = memory_pool().await.unwrap();
        let store = SqliteStore::new(pool.clone());
        store.migrate().await.unwrap();

        let mailer = Arc::new(MemoryMailer::default());
        let auth = SqliteAuth::new(pool, mailer.clone(), chrono::Duration::minutes(60));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Config {
            public_url: format!("http://{addr}"),
            ..Config::default()
        };

        let db = Db::new(Arc::new(store));
        let state = AppState {
            db: db.clone(),
            auth: Arc::new(auth),
            config: Arc::new(config),
        };
        tokio::spawn(async move {
            axum::serve(listener, murmur::app(state)).await.unwrap();
        });

        Self { addr, mailer, db }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn client() -> Client {
        Client::builder()
            .cookie_store(true)
            .redirect(Policy::none())
            .build()
            .unwrap()
    }

    /// Signs up and confirms `name`, returning a client holding the session.
    async fn signed_in(&self, name: &str) -> Client {
        self.signed_in_with_cookie(name).await.0
    }

    /// Like [`TestApp::signed_in`], also returning the session cookie pair.
    async fn signed_in_with_cookie(&self, name: &str) -> (Client, String) {
        let client = Self::client();
        let email = format!("{name}@example.com");

        let body = client
            .post(self.url("/signup"))
            .form(&[("email", email.as_str()), ("password", "hunter22"), ("username", name)])
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("Check your email for the confirmation link!"));

        let link = self.mailer.last_link(&email).unwrap();
        let res = client.get(link).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/dashboard");

        let cookie = res.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        let cookie = cookie.split(';').next().unwrap().to_owned();
        (client, cookie)
    }

    async fn posts(&self) -> Vec<Post> {
        self.db.list(&murmur::backend::Query::new()).await
    }
}

fn location(res: &reqwest::Response) -> &str {
    res.headers().get(LOCATION).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn anonymous_dashboard_redirects_to_login() {
    let app = TestApp::spawn().await;
    let client = TestApp::client();

    let res = client.get(app.url("/dashboard/chat")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/login");

    let res = client.get(app.url("/")).send().await.unwrap();
    assert_eq!(location(&res), "/login");
}

#[tokio::test]
async fn sign_up_confirm_and_open_dashboard() {
    let app = TestApp::spawn().await;
    let client = app.signed_in("ann").await;

    let res = client.get(app.url("/")).send().await.unwrap();
    assert_eq!(location(&res), "/dashboard");

    let page = client.get(app.url("/dashboard")).send().await.unwrap().text().await.unwrap();
    assert!(page.contains("What's on your mind?"));
    assert!(page.contains("ann"));

    let page = client.get(app.url("/dashboard/nonsense")).send().await.unwrap().text().await.unwrap();
    assert!(page.contains(r#"class="nav-item active" href="/dashboard/feed""#));
}

#[tokio::test]
async fn invalid_token_lands_on_error_page() {
    let app = TestApp::spawn().await;
    let client = TestApp::client();

    let res = client
        .get(app.url("/auth/callback?token_hash=bogus&type=signup"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/auth/auth-code-error");

    let res = client.get(app.url("/auth/callback")).send().await.unwrap();
    assert_eq!(location(&res), "/auth/auth-code-error");

    let page = client.get(app.url("/auth/auth-code-error")).send().await.unwrap().text().await.unwrap();
    assert!(page.contains("Try Again"));
}

#[tokio::test]
async fn callback_honours_local_next_only() {
    let app = TestApp::spawn().await;
    let client = TestApp::client();

    client
        .post(app.url("/login/magic"))
        .form(&[("email", "bo@example.com")])
        .send()
        .await
        .unwrap();
    let link = app.mailer.last_link("bo@example.com").unwrap();
    let res = client.get(format!("{link}&next=/dashboard/chat")).send().await.unwrap();
    assert_eq!(location(&res), "/dashboard/chat");

    for next in ["//evil.example", "/%09/evil.example", "/%0A"] {
        let other = TestApp::client();
        other
            .post(app.url("/login/magic"))
            .form(&[("email", "bo@example.com")])
            .send()
            .await
            .unwrap();
        let link = app.mailer.last_link("bo@example.com").unwrap();
        let res = other.get(format!("{link}&next={next}")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER, "next={next}");
        assert_eq!(location(&res), "/dashboard", "next={next}");
    }
}

#[tokio::test]
async fn password_sign_in_and_out() {
    let app = TestApp::spawn().await;
    app.signed_in("cy").await;

    let client = TestApp::client();
    let body = client
        .post(app.url("/login"))
        .form(&[("email", "cy@example.com"), ("password", "wrong-one")])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("Invalid login credentials"));

    let res = client
        .post(app.url("/login"))
        .form(&[("email", "cy@example.com"), ("password", "hunter22")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/dashboard");

    let res = client.post(app.url("/logout")).send().await.unwrap();
    assert_eq!(location(&res), "/login");

    let res = client.get(app.url("/dashboard")).send().await.unwrap();
    assert_eq!(location(&res), "/login");
}

#[tokio::test]
async fn only_the_author_deletes_a_post() {
    let app = TestApp::spawn().await;
    let ann = app.signed_in("ann").await;
    let bo = app.signed_in("bo").await;

    let res = ann
        .post(app.url("/posts"))
        .form(&[("content", "hello")])
        .send()
        .await
        .unwrap();
    assert_eq!(location(&res), "/dashboard/feed");

    let posts = app.posts().await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].content, "hello");
    assert_eq!(posts[0].username, "ann");

    let delete = app.url(&format!("/posts/{}/delete", posts[0].id));
    bo.post(&delete).send().await.unwrap();
    assert_eq!(app.posts().await.len(), 1);

    ann.post(&delete).send().await.unwrap();
    assert!(app.posts().await.is_empty());
}

#[tokio::test]
async fn blank_and_overlong_posts_are_dropped() {
    let app = TestApp::spawn().await;
    let ann = app.signed_in("ann").await;

    for content in ["   ".to_owned(), "x".repeat(501)] {
        ann.post(app.url("/posts"))
            .form(&[("content", content.as_str())])
            .send()
            .await
            .unwrap();
    }
    assert_eq!(app.db.count::<Post>(&Filter::new()).await, 0);
}

#[tokio::test]
async fn profile_is_created_then_edited() {
    let app = TestApp::spawn().await;
    let ann = app.signed_in("ann").await;

    let page = ann.get(app.url("/dashboard/profile")).send().await.unwrap().text().await.unwrap();
    assert!(page.contains("<h2>ann</h2>"));

    ann.post(app.url("/profile"))
        .form(&[("username", "annie"), ("bio", "hello there"), ("website", "annie.dev")])
        .send()
        .await
        .unwrap();

    let page = ann.get(app.url("/dashboard/profile")).send().await.unwrap().text().await.unwrap();
    assert!(page.contains("<h2>annie</h2>"));
    assert!(page.contains("hello there"));
    assert!(page.contains(r#"href="https://annie.dev""#));
}

async fn next_op(socket: &mut (impl StreamExt<Item = tokio_tungstenite::tungstenite::Result<Message>> + Unpin)) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame within 5s")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn feed_socket_streams_and_releases_on_close() {
    let app = TestApp::spawn().await;
    let (ann, cookie) = app.signed_in_with_cookie("ann").await;
    let online = app.db.presence_channel(ONLINE_USERS);

    let mut request = format!("ws://{}/dashboard/feed/ws", app.addr).into_client_request().unwrap();
    request.headers_mut().insert(COOKIE, cookie.parse().unwrap());
    let (mut socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let reset = next_op(&mut socket).await;
    assert_eq!(reset["op"], "reset");
    assert_eq!(reset["target"], "posts");
    assert_eq!(online.distinct_users(), 1);

    ann.post(app.url("/posts")).form(&[("content", "live")]).send().await.unwrap();
    let prepend = next_op(&mut socket).await;
    assert_eq!(prepend["op"], "prepend");
    assert!(prepend["html"].as_str().unwrap().contains("live"));

    socket.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while online.distinct_users() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("presence not released after close");
}

#[tokio::test]
async fn anonymous_socket_is_refused() {
    let app = TestApp::spawn().await;
    let result = tokio_tungstenite::connect_async(format!("ws://{}/dashboard/feed/ws", app.addr)).await;
    assert!(result.is_err());
}
