//! Shared test utilities

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use family_locator::api::ApiState;
use family_locator::db::{self, Child, Role, User};
use family_locator::security::hash_password;
use family_locator::{ApiServerBuilder, DbPool};
use serde_json::Value;
use tower::ServiceExt;

/// Lowest bcrypt cost, to keep tests fast
pub const TEST_BCRYPT_COST: u32 = 4;

pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// The full application wired to an in-memory database
pub struct TestApp {
    pub router: Router,
    pub state: Arc<ApiState>,
}

impl TestApp {
    pub fn new() -> Self {
        let server = ApiServerBuilder::new(setup_test_db(), &[42u8; 64])
            .bcrypt_cost(TEST_BCRYPT_COST)
            .build();
        Self {
            router: server.router(),
            state: server.state(),
        }
    }

    /// Create an account directly in the database
    pub fn create_user(&self, email: &str, role: Role) -> User {
        let hash = hash_password(TEST_PASSWORD, TEST_BCRYPT_COST).expect("hash");
        self.state
            .users
            .create(email, &hash, role)
            .expect("failed to create test user")
    }

    /// Create a parent and a child account linked to one child record
    pub fn paired_family(&self) -> (User, User, Child) {
        let parent = self.create_user("parent@example.com", Role::Parent);
        let kid = self.create_user("kid@example.com", Role::Child);
        let child = self
            .state
            .children
            .create_for_parent(&parent.id, "Ada")
            .expect("create child");
        let code = child.pairing_code.expect("fresh child has a code");
        let child = self
            .state
            .children
            .link_user(&code, &kid.id)
            .expect("link")
            .expect("code matches");
        (parent, kid, child)
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Log in through the form and return the browser that holds the session
    pub async fn login(&self, email: &str) -> Browser {
        let mut browser = Browser::default();
        let response = browser
            .post_form(
                self,
                "/login",
                &format!("email={email}&password={TEST_PASSWORD}"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        browser
    }
}

/// Minimal cookie-keeping client
#[derive(Default)]
pub struct Browser {
    cookies: BTreeMap<String, String>,
}

impl Browser {
    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn store_cookies(&mut self, response: &Response) {
        for value in response.headers().get_all(header::SET_COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            let first = value.split(';').next().unwrap_or_default();
            let Some((name, val)) = first.split_once('=') else {
                continue;
            };
            let expired = val.is_empty() || value.contains("Max-Age=0");
            if expired {
                self.cookies.remove(name.trim());
            } else {
                self.cookies
                    .insert(name.trim().to_string(), val.trim().to_string());
            }
        }
    }

    pub async fn request(
        &mut self,
        app: &TestApp,
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: Body,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookies) = self.cookie_header() {
            builder = builder.header(header::COOKIE, cookies);
        }
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }

        let response = app.send(builder.body(body).expect("request")).await;
        self.store_cookies(&response);
        response
    }

    pub async fn get(&mut self, app: &TestApp, uri: &str) -> Response {
        self.request(app, Method::GET, uri, None, Body::empty()).await
    }

    pub async fn delete(&mut self, app: &TestApp, uri: &str) -> Response {
        self.request(app, Method::DELETE, uri, None, Body::empty())
            .await
    }

    pub async fn post_form(&mut self, app: &TestApp, uri: &str, form: &str) -> Response {
        self.request(
            app,
            Method::POST,
            uri,
            Some("application/x-www-form-urlencoded"),
            Body::from(form.to_string()),
        )
        .await
    }

    pub async fn post_json(&mut self, app: &TestApp, uri: &str, json: &Value) -> Response {
        self.request(
            app,
            Method::POST,
            uri,
            Some("application/json"),
            Body::from(json.to_string()),
        )
        .await
    }
}

/// Redirect target of a response
pub fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("JSON body")
}
