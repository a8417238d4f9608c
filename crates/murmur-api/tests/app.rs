use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use murmur_api::i18n::Locale;
use murmur_api::language::LanguageDetector;
use murmur_api::mail::{Mailer, OutgoingEmail};
use murmur_api::search::FtsIndex;
use murmur_api::translate::{TranslateError, Translator, UnconfiguredTranslator};
use murmur_api::{AppStateInner, Settings};
use murmur_db::Database;

// -- Fakes --

struct FixedDetector(Option<&'static str>);

impl LanguageDetector for FixedDetector {
    fn detect(&self, _text: &str) -> Option<String> {
        self.0.map(String::from)
    }
}

struct EchoTranslator;

#[async_trait]
impl Translator for EchoTranslator {
    async fn translate(&self, text: &str, _from: &str, to: &str) -> Result<String, TranslateError> {
        Ok(format!("[{to}] {text}"))
    }
}

struct BrokenTranslator;

#[async_trait]
impl Translator for BrokenTranslator {
    async fn translate(&self, _: &str, _: &str, _: &str) -> Result<String, TranslateError> {
        Err(TranslateError::Failed("timed out".into()))
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

// -- Harness --

struct TestApp {
    router: Router,
    db: Arc<Database>,
    mailer: Arc<RecordingMailer>,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestApp {
    fn new(posts_per_page: u32) -> Self {
        Self::with(posts_per_page, Arc::new(EchoTranslator), None)
    }

    fn with(posts_per_page: u32, translator: Arc<dyn Translator>, language: Option<&'static str>) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mailer = Arc::new(RecordingMailer::default());
        let state = Arc::new(AppStateInner {
            db: db.clone(),
            settings: Settings {
                secret: "integration-test-secret".into(),
                base_url: "http://murmur.test".into(),
                posts_per_page,
                ..Settings::default()
            },
            detector: Arc::new(FixedDetector(language)),
            translator,
            search: Arc::new(FtsIndex::new(db.clone())),
            mailer: mailer.clone(),
        });
        Self {
            router: murmur_api::router(state),
            db,
            mailer,
        }
    }

    async fn request(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Reply { status, headers, body }
    }

    async fn get(&self, uri: &str, token: &str) -> Reply {
        self.request(Method::GET, uri, Some(token), None).await
    }

    async fn post(&self, uri: &str, token: &str, body: Value) -> Reply {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    async fn register(&self, username: &str, password: &str) -> Reply {
        self.request(
            Method::POST,
            "/register",
            None,
            Some(json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": password,
                "password2": password,
            })),
        )
        .await
    }

    async fn login(&self, username: &str, password: &str) -> Reply {
        self.request(
            Method::POST,
            "/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await
    }

    /// Register and log in, returning the session token.
    async fn user(&self, username: &str) -> String {
        assert_eq!(self.register(username, "pw").await.status, StatusCode::CREATED);
        let reply = self.login(username, "pw").await;
        assert_eq!(reply.status, StatusCode::OK);
        reply.body["token"].as_str().unwrap().to_string()
    }

    async fn csrf_token(&self, token: &str, username: &str) -> String {
        let reply = self.get(&format!("/user/{username}/popup"), token).await;
        reply.body["csrf_token"].as_str().unwrap().to_string()
    }

    async fn create_post(&self, token: &str, body: &str) {
        let reply = self.post("/index", token, json!({ "post": body })).await;
        assert_eq!(reply.status, StatusCode::CREATED, "{:?}", reply.body);
    }
}

fn bodies(page: &Value) -> Vec<&str> {
    page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["body"].as_str().unwrap())
        .collect()
}

// -- Auth --

#[tokio::test]
async fn health_needs_no_session() {
    let app = TestApp::new(25);
    let reply = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!("ok"));
}

#[tokio::test]
async fn login_failure_does_not_reveal_which_part_was_wrong() {
    let app = TestApp::new(25);
    app.user("susan").await;

    let wrong_password = app.login("susan", "nope").await;
    let unknown_user = app.login("nobody", "pw").await;

    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.body, unknown_user.body);
    assert_eq!(wrong_password.body["error"], "Invalid username or password");
}

#[tokio::test]
async fn session_cookie_authenticates_and_remember_me_persists_it() {
    let app = TestApp::new(25);
    app.register("susan", "pw").await;

    let reply = app
        .request(
            Method::POST,
            "/login?next=/explore",
            None,
            Some(json!({ "username": "susan", "password": "pw", "remember_me": true })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["redirect"], "/explore");
    let cookie = reply.headers[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.contains("Max-Age="));

    let pair = cookie.split(';').next().unwrap().to_string();
    let request = Request::builder()
        .uri("/explore")
        .header(header::COOKIE, pair)
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(request).await.status, StatusCode::OK);

    let plain = app.login("susan", "pw").await;
    assert!(!plain.headers[header::SET_COOKIE].to_str().unwrap().contains("Max-Age"));
}

#[tokio::test]
async fn foreign_next_is_ignored() {
    let app = TestApp::new(25);
    app.register("susan", "pw").await;
    let reply = app
        .request(
            Method::POST,
            "/login?next=https://evil.example/",
            None,
            Some(json!({ "username": "susan", "password": "pw" })),
        )
        .await;
    assert_eq!(reply.body["redirect"], "/index");
}

#[tokio::test]
async fn protected_routes_require_a_session() {
    let app = TestApp::new(25);
    let reply = app.request(Method::GET, "/explore?page=2", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["redirect"], "/login?next=%2Fexplore%3Fpage%3D2");

    let reply = app.get("/explore", "not-a-jwt").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_registration_is_a_field_error() {
    let app = TestApp::new(25);
    app.user("susan").await;

    let reply = app.register("susan", "pw").await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["fields"]["username"][0], "Please use a different username.");
    assert_eq!(reply.body["fields"]["email"][0], "Please use a different email address.");
}

#[tokio::test]
async fn password_reset_round_trip() {
    let app = TestApp::new(25);
    app.user("susan").await;

    let unknown = app
        .request(
            Method::POST,
            "/reset_password_request",
            None,
            Some(json!({ "email": "ghost@example.com" })),
        )
        .await;
    let known = app
        .request(
            Method::POST,
            "/reset_password_request",
            None,
            Some(json!({ "email": "susan@example.com" })),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::OK);
    assert_eq!(unknown.body, known.body);

    let email = {
        let sent = app.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        sent[0].clone()
    };
    assert_eq!(email.to, ["susan@example.com"]);
    let link_start = email.body.find("http://murmur.test/reset_password/").unwrap();
    let path = email.body[link_start + "http://murmur.test".len()..]
        .split_whitespace()
        .next()
        .unwrap()
        .to_string();

    assert_eq!(app.request(Method::GET, &path, None, None).await.status, StatusCode::OK);

    let reply = app
        .request(
            Method::POST,
            &path,
            None,
            Some(json!({ "password": "new-pw", "password2": "new-pw" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    assert_eq!(app.login("susan", "pw").await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.login("susan", "new-pw").await.status, StatusCode::OK);
}

#[tokio::test]
async fn bad_reset_token_redirects_to_index() {
    let app = TestApp::new(25);
    let reply = app.request(Method::GET, "/reset_password/garbage", None, None).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.headers[header::LOCATION], "/index");
}

// -- Social graph --

#[tokio::test]
async fn follow_is_idempotent_and_self_follow_is_rejected() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;
    app.user("bob").await;
    let csrf = app.csrf_token(&alice, "bob").await;

    for _ in 0..2 {
        let reply = app.post("/follow/bob", &alice, json!({ "csrf_token": csrf })).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["message"], "You are following bob!");
    }
    let bob = app.get("/user/bob/popup", &alice).await;
    assert_eq!(bob.body["followers"], 1);
    assert_eq!(bob.body["is_following"], true);

    let reply = app.post("/follow/alice", &alice, json!({ "csrf_token": csrf })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], "You cannot follow yourself!");

    let reply = app.post("/unfollow/alice", &alice, json!({ "csrf_token": csrf })).await;
    assert_eq!(reply.body["error"], "You cannot unfollow yourself!");

    for _ in 0..2 {
        let reply = app.post("/unfollow/bob", &alice, json!({ "csrf_token": csrf })).await;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let bob = app.get("/user/bob/popup", &alice).await;
    assert_eq!(bob.body["followers"], 0);
}

#[tokio::test]
async fn follow_checks_form_token_before_target() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;

    let reply = app.post("/follow/ghost", &alice, json!({ "csrf_token": "1.00" })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let csrf = app.csrf_token(&alice, "alice").await;
    let reply = app.post("/follow/ghost", &alice, json!({ "csrf_token": csrf })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["error"], "User ghost not found.");
}

#[tokio::test]
async fn unreadable_follow_body_fails_like_a_bad_form_token() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;
    app.user("bob").await;

    let form = Request::builder()
        .method(Method::POST)
        .uri("/follow/bob")
        .header(header::AUTHORIZATION, format!("Bearer {alice}"))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("csrf_token=forged"))
        .unwrap();
    let empty = Request::builder()
        .method(Method::POST)
        .uri("/unfollow/bob")
        .header(header::AUTHORIZATION, format!("Bearer {alice}"))
        .body(Body::empty())
        .unwrap();

    for request in [form, empty] {
        let reply = app.send(request).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["error"], "The form has expired, please try again.");
        assert_eq!(reply.body["redirect"], "/index");
    }

    let reply = app.post("/follow/bob", &alice, json!({})).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["redirect"], "/index");
}

#[tokio::test]
async fn malformed_bodies_get_a_json_error() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/index")
        .header(header::AUTHORIZATION, format!("Bearer {alice}"))
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();
    let reply = app.send(request).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], "The request could not be understood.");

    let reply = app
        .request(Method::POST, "/login", None, Some(json!({ "username": "alice" })))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["error"].is_string());
}

#[tokio::test]
async fn every_authenticated_request_refreshes_last_seen() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;
    let alice_id = app.db.get_user_by_username("alice").unwrap().unwrap().id;

    let stale = "2000-01-01T00:00:00.000000Z";
    app.db.touch_last_seen(&alice_id, stale).unwrap();

    let reply = app.get("/user/alice/popup", &alice).await;
    assert_eq!(reply.status, StatusCode::OK);

    let stored = app.db.get_user_by_id(&alice_id).unwrap().unwrap().last_seen.unwrap();
    assert!(stored.as_str() > stale, "last_seen still {stored}");
    // The handler already saw the refreshed value.
    assert!(!reply.body["last_seen"].as_str().unwrap().starts_with("2000-"));
}

// -- Feeds --

#[tokio::test]
async fn home_feed_pages_through_followed_posts() {
    let app = TestApp::new(2);
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;
    let csrf = app.csrf_token(&alice, "bob").await;
    app.post("/follow/bob", &alice, json!({ "csrf_token": csrf })).await;

    for body in ["first", "second", "third"] {
        app.create_post(&bob, body).await;
    }

    let page1 = app.get("/index", &alice).await.body;
    assert_eq!(bodies(&page1), ["third", "second"]);
    assert_eq!(page1["next_url"], "/index?page=2");
    assert_eq!(page1["prev_url"], Value::Null);

    let page2 = app.get("/index?page=2", &alice).await.body;
    assert_eq!(bodies(&page2), ["first"]);
    assert_eq!(page2["next_url"], Value::Null);
    assert_eq!(page2["prev_url"], "/index?page=1");

    let beyond = app.get("/index?page=7", &alice).await;
    assert_eq!(beyond.status, StatusCode::OK);
    assert!(bodies(&beyond.body).is_empty());
}

#[tokio::test]
async fn profile_of_unknown_user_is_not_found() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;
    assert_eq!(app.get("/user/ghost", &alice).await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.get("/user/ghost/popup", &alice).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn posts_carry_detected_language() {
    let app = TestApp::with(25, Arc::new(EchoTranslator), Some("es"));
    let alice = app.user("alice").await;
    app.create_post(&alice, "hola a todos").await;

    let english = app.get("/explore", &alice).await.body;
    assert_eq!(english["items"][0]["language"], "es");
    assert_eq!(english["items"][0]["translatable"], true);

    let request = Request::builder()
        .uri("/explore")
        .header(header::AUTHORIZATION, format!("Bearer {alice}"))
        .header(header::ACCEPT_LANGUAGE, Locale::Es.code())
        .body(Body::empty())
        .unwrap();
    let spanish = app.send(request).await.body;
    assert_eq!(spanish["items"][0]["translatable"], false);
}

#[tokio::test]
async fn edit_profile_rejects_taken_username() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;
    app.user("bob").await;

    let reply = app.post("/edit_profile", &alice, json!({ "username": "bob" })).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

    let reply = app
        .post("/edit_profile", &alice, json!({ "username": "alicia", "about_me": "hi" }))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let current = app.get("/edit_profile", &alice).await.body;
    assert_eq!(current["username"], "alicia");
    assert_eq!(current["about_me"], "hi");
}

// -- Search & translation --

#[tokio::test]
async fn search_finds_posts_and_empty_query_redirects() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;
    app.create_post(&alice, "learning rust today").await;
    app.create_post(&alice, "cooking pasta").await;

    let reply = app.get("/search?q=rust", &alice).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(bodies(&reply.body), ["learning rust today"]);

    let reply = app.get("/search?q=", &alice).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.headers[header::LOCATION], "/explore");
}

#[tokio::test]
async fn translation_errors_map_to_gateway_statuses() {
    let request = json!({ "text": "hola", "source_language": "es", "dest_language": "en" });

    let app = TestApp::new(25);
    let token = app.user("alice").await;
    let reply = app.post("/translate", &token, request.clone()).await;
    assert_eq!(reply.body, json!({ "text": "[en] hola" }));

    let app = TestApp::with(25, Arc::new(UnconfiguredTranslator), None);
    let token = app.user("alice").await;
    let reply = app.post("/translate", &token, request.clone()).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);

    let app = TestApp::with(25, Arc::new(BrokenTranslator), None);
    let token = app.user("alice").await;
    let reply = app.post("/translate", &token, request).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.body["error"], "Error: the translation service failed.");
}

// -- Messages & notifications --

#[tokio::test]
async fn message_to_missing_recipient_persists_nothing() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;

    let reply = app.post("/send_message/ghost", &alice, json!({ "message": "hi" })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let alice_id = app.db.get_user_by_username("alice").unwrap().unwrap().id;
    assert_eq!(app.db.count_messages_from(&alice_id).unwrap(), 0);
}

#[tokio::test]
async fn unread_counter_follows_messages_and_polling_is_monotonic() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    for text in ["hi", "you there?"] {
        let reply = app.post("/send_message/bob", &alice, json!({ "message": text })).await;
        assert_eq!(reply.status, StatusCode::CREATED);
    }

    let first = app.get("/notifications", &bob).await.body;
    let first = first.as_array().unwrap().clone();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0]["name"], "unread_message_count");
    assert_eq!(first[0]["data"], 2);
    let since = first[0]["timestamp"].as_f64().unwrap();

    let again = app.get(&format!("/notifications?since={since}"), &bob).await.body;
    assert_eq!(again, json!([]));

    let inbox = app.get("/messages", &bob).await.body;
    assert_eq!(bodies(&inbox), ["you there?", "hi"]);
    assert_eq!(inbox["items"][0]["sender"]["username"], "alice");

    let after = app.get(&format!("/notifications?since={since}"), &bob).await.body;
    let after = after.as_array().unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0]["data"], 0);
    assert!(after[0]["timestamp"].as_f64().unwrap() > since);

    // Alice's own counter was never touched.
    assert_eq!(app.get("/notifications?since=abc", &alice).await.body, json!([]));
}

// -- Export --

#[tokio::test]
async fn export_emails_posts_and_completes() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;
    app.create_post(&alice, "one").await;
    app.create_post(&alice, "two").await;

    let reply = app.get("/export_posts", &alice).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["redirect"], "/user/alice");

    let alice_id = app.db.get_user_by_username("alice").unwrap().unwrap().id;
    for _ in 0..200 {
        if app.db.task_in_progress(&alice_id, "export_posts").unwrap().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(app.db.task_in_progress(&alice_id, "export_posts").unwrap().is_none());

    let email = app.mailer.sent.lock().unwrap()[0].clone();
    assert_eq!(email.attachments[0].filename, "posts.json");
    let exported: Value = serde_json::from_slice(&email.attachments[0].data).unwrap();
    let exported: Vec<&str> = exported["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["body"].as_str().unwrap())
        .collect();
    assert_eq!(exported, ["one", "two"]);

    let progress = app.get("/notifications", &alice).await.body;
    let progress = progress
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["name"] == "task_progress")
        .unwrap()
        .clone();
    assert_eq!(progress["data"]["progress"], 100);
}

#[tokio::test]
async fn second_export_is_refused_while_one_runs() {
    let app = TestApp::new(25);
    let alice = app.user("alice").await;
    let alice_id = app.db.get_user_by_username("alice").unwrap().unwrap().id;
    app.db
        .launch_task_if_idle("running", "export_posts", "Exporting posts...", &alice_id)
        .unwrap()
        .unwrap();

    let reply = app.get("/export_posts", &alice).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["message"], "An export task is currently in progress");
    assert_eq!(reply.body["redirect"], "/user/alice");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.mailer.sent.lock().unwrap().is_empty());
    assert_eq!(app.db.task_in_progress(&alice_id, "export_posts").unwrap().unwrap().id, "running");
}
