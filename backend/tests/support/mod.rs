#![allow(dead_code)]
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use gatehouse_backend::{
    config::Config,
    handlers,
    models::user::{User, UserRole},
    repositories::{MemoryStore, UserRepository},
    state::AppState,
    utils::{
        cookies::{CSRF_COOKIE_NAME, CSRF_HEADER_NAME},
        mfa::generate_totp_code_at,
        password::hash_password,
    },
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

pub const PASSWORD: &str = "Correct-horse-9";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub fn test_config() -> Config {
    Config::development()
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config())
}

pub fn spawn_app_with(config: Config) -> TestApp {
    let (state, store) = AppState::in_memory(config);
    TestApp {
        router: handlers::router(state.clone()),
        state,
        store,
    }
}

pub async fn seed_user(app: &TestApp, email: &str, role: UserRole) -> User {
    let hash = hash_password(PASSWORD).expect("hash password");
    let user = User::new(email, email.split('@').next().unwrap_or(email), hash, role);
    UserRepository::create(app.store.as_ref(), &user)
        .await
        .expect("seed user");
    user
}

/// A distinct peer address per `n`, so per-IP login limits can be steered.
pub fn peer(n: u8) -> SocketAddr {
    SocketAddr::from(([198, 51, 100, n], 40000))
}

pub fn current_totp(secret: &str) -> String {
    generate_totp_code_at(secret, Utc::now().timestamp() as u64).expect("totp code")
}

/// Minimal browser stand-in: remembers cookies across responses and
/// echoes the CSRF cookie in the header when asked.
#[derive(Debug, Clone)]
pub struct Client {
    pub cookies: HashMap<String, String>,
    pub peer: SocketAddr,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Client {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            cookies: HashMap::new(),
            peer,
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn csrf(&self) -> Option<String> {
        self.cookie(CSRF_COOKIE_NAME).map(str::to_string)
    }

    pub async fn get(&mut self, app: &TestApp, uri: &str) -> TestResponse {
        self.send(app, Method::GET, uri, None, false).await
    }

    /// State-changing call carrying the CSRF header.
    pub async fn post(&mut self, app: &TestApp, uri: &str, body: Value) -> TestResponse {
        self.send(app, Method::POST, uri, Some(body), true).await
    }

    pub async fn put(&mut self, app: &TestApp, uri: &str, body: Value) -> TestResponse {
        self.send(app, Method::PUT, uri, Some(body), true).await
    }

    /// Same as `post` but never sends the CSRF header.
    pub async fn post_without_csrf(
        &mut self,
        app: &TestApp,
        uri: &str,
        body: Value,
    ) -> TestResponse {
        self.send(app, Method::POST, uri, Some(body), false).await
    }

    pub async fn login(&mut self, app: &TestApp, email: &str, password: &str) -> TestResponse {
        self.post(
            app,
            "/api/auth/login",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn send(
        &mut self,
        app: &TestApp,
        method: Method,
        uri: &str,
        body: Option<Value>,
        with_csrf: bool,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if !self.cookies.is_empty() {
            let cookie_header = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, cookie_header);
        }
        if with_csrf {
            if let Some(token) = self.csrf() {
                builder = builder.header(CSRF_HEADER_NAME, token);
            }
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let mut request = builder.body(body).expect("build request");
        request.extensions_mut().insert(ConnectInfo(self.peer));

        let response = app
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("call router");
        let status = response.status();
        let headers = response.headers().clone();
        self.absorb(&headers);
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    fn absorb(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            let Some((name, rest)) = raw.split_once('=') else {
                continue;
            };
            let value = rest.split(';').next().unwrap_or_default().trim();
            if value.is_empty() || raw.contains("Max-Age=0") {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }
    }
}

pub fn set_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}=");
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with(&prefix))
}
