//! In-process test harness: the full router over a memory store.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

use crate::config::Config;
use crate::database::models::User;
use crate::server::{AppState, build_router};
use crate::services::images::tests::scratch_dir;
use crate::services::users;
use crate::store::MemoryStore;

const BOUNDARY: &str = "recipe-test-boundary";

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let config = Config::for_tests(scratch_dir());
        let state = AppState::new(config, Arc::new(MemoryStore::new()));
        let router = build_router(state.clone());
        Self { state, router }
    }

    pub fn media_root(&self) -> &Path {
        self.state.images.root()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    /// Send a request and decode the JSON body; an empty body reads as `Null`
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, token, body).await;
        decode(response).await
    }

    /// POST a single-file multipart form
    pub async fn upload(
        &self,
        uri: &str,
        token: Option<&str>,
        field: &str,
        filename: &str,
        contents: Vec<u8>,
    ) -> (StatusCode, Value) {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(&contents);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = self
            .router
            .clone()
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        decode(response).await
    }

    pub async fn create_user(&self, email: &str, password: &str) -> User {
        users::create_user(self.state.store.as_ref(), email, password, "Test Name")
            .await
            .unwrap()
    }

    /// Create a user and issue it a token
    pub async fn login(&self, email: &str, password: &str) -> (User, String) {
        let user = self.create_user(email, password).await;
        let token = self.state.jwt_service.create_token(user.id, &user.email).unwrap();
        (user, token)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(self.state.images.root());
    }
}

async fn decode(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}
