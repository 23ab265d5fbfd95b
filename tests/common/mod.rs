#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use rusqlite::params;
use tempfile::TempDir;
use tower::ServiceExt;

use threadly::auth::accounts;
use threadly::config::Config;
use threadly::db;
use threadly::routes;
use threadly::state::AppState;

pub const PASSWORD: &str = "password1";

/// A router over a throwaway database and uploads directory.
pub struct TestApp {
    pub state: AppState,
    app: Router,
    _temp_dir: TempDir,
}

/// Cookie and CSRF token of one browser session.
#[derive(Debug, Clone)]
pub struct Client {
    pub cookie: String,
    pub csrf: String,
}

impl TestApp {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.resolve_paths(temp_dir.path());
        config.auth.bcrypt_cost = 4;

        let pool = db::create_pool(config.db_path()).expect("Failed to create test database");
        db::run_migrations(&pool).expect("Failed to run migrations");

        let state = AppState::new(pool, config);
        let app = routes::build_router(state.clone());
        Self {
            state,
            app,
            _temp_dir: temp_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, client: Option<&Client>, uri: &str) -> Response<Body> {
        let mut builder = Request::get(uri);
        if let Some(client) = client {
            builder = builder.header(header::COOKIE, &client.cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(
        &self,
        client: Option<&Client>,
        uri: &str,
        fields: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(client) = client {
            builder = builder.header(header::COOKIE, &client.cookie);
        }
        self.send(builder.body(Body::from(encode_form(fields))).unwrap())
            .await
    }

    /// CSRF token stored for the session behind `cookie`.
    pub fn csrf_for(&self, cookie: &str) -> String {
        let token = cookie.split_once('=').map(|(_, t)| t).unwrap_or_default();
        let conn = self.state.db.get().unwrap();
        conn.query_row(
            "SELECT csrf_token FROM sessions WHERE token = ?1",
            params![token],
            |r| r.get(0),
        )
        .unwrap()
    }

    /// Opens the home page as a new visitor and returns the anonymous session.
    pub async fn visit(&self) -> Client {
        let response = self.get(None, "/").await;
        let cookie = session_cookie(&response).expect("home page sets a session cookie");
        Client {
            csrf: self.csrf_for(&cookie),
            cookie,
        }
    }

    pub fn create_user(&self, username: &str) -> i64 {
        let conn = self.state.db.get().unwrap();
        accounts::register(
            &conn,
            username,
            &format!("{}@example.com", username),
            PASSWORD,
            4,
        )
        .unwrap()
        .unwrap()
    }

    pub async fn login(&self, username: &str) -> Client {
        let visitor = self.visit().await;
        let response = self
            .post_form(
                Some(&visitor),
                "/login",
                &[
                    ("_csrf", &visitor.csrf),
                    ("identifier", username),
                    ("password", PASSWORD),
                ],
            )
            .await;
        assert_eq!(location(&response), Some("/dashboard"), "login should succeed");
        let cookie = session_cookie(&response).expect("login sets a fresh session cookie");
        Client {
            csrf: self.csrf_for(&cookie),
            cookie,
        }
    }

    pub fn create_post(&self, user_id: i64, title: &str) -> i64 {
        let conn = self.state.db.get().unwrap();
        conn.execute(
            "INSERT INTO posts (user_id, title, slug, content) VALUES (?1, ?2, ?3, 'Body text')",
            params![user_id, title, format!("{}-{}", title.to_lowercase(), user_id)],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    pub fn count(&self, sql: &str) -> i64 {
        let conn = self.state.db.get().unwrap();
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }
}

/// `name=value` part of the response's Set-Cookie header.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .next()
        .map(str::to_string)
}

pub fn location(response: &Response<Body>) -> Option<&str> {
    response.headers().get(header::LOCATION)?.to_str().ok()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

pub fn encode_form(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}
