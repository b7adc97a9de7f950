//! Health worker authentication.
//!
//! The identity provider is an opaque external capability behind
//! `AuthProvider`. `HttpAuthProvider` talks to a JSON login endpoint.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The logged-in health worker. Persisted under `chw_user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub phone: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Phone number and password are required")]
    MissingCredentials,

    #[error("Invalid phone number or password")]
    InvalidCredentials,

    #[error("Login timed out after {0}s")]
    Timeout(u64),

    #[error("Cannot reach login server at {0}")]
    Connection(String),

    #[error("Login server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Invalid login response: {0}")]
    InvalidResponse(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

pub trait AuthProvider: Send + Sync {
    fn login<'a>(
        &'a self,
        phone: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<UserIdentity, AuthError>>;
}

/// `POST <base>/auth/login` with `{phone, password}`; 200 returns the identity.
pub struct HttpAuthProvider {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpAuthProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    phone: &'a str,
    password: &'a str,
}

impl AuthProvider for HttpAuthProvider {
    fn login<'a>(
        &'a self,
        phone: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<UserIdentity, AuthError>> {
        Box::pin(async move {
            let url = format!("{}/auth/login", self.base_url);
            let response = self
                .client
                .post(&url)
                .json(&LoginRequest { phone, password })
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        AuthError::Timeout(self.timeout_secs)
                    } else if e.is_connect() {
                        AuthError::Connection(self.base_url.clone())
                    } else {
                        AuthError::HttpClient(e.to_string())
                    }
                })?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                return Err(AuthError::InvalidCredentials);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AuthError::Server {
                    status: status.as_u16(),
                    body,
                });
            }

            response
                .json::<UserIdentity>()
                .await
                .map_err(|e| AuthError::InvalidResponse(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn login_router() -> Router {
        Router::new().route(
            "/auth/login",
            post(|Json(body): Json<serde_json::Value>| async move {
                if body["phone"] == "08031234567" && body["password"] == "secret" {
                    Ok(Json(serde_json::json!({
                        "id": "chw-0803",
                        "name": "Hauwa Bello",
                        "phone": "08031234567"
                    })))
                } else {
                    Err(StatusCode::UNAUTHORIZED)
                }
            }),
        )
    }

    #[tokio::test]
    async fn valid_credentials_return_identity() {
        let base = serve(login_router()).await;
        let provider = HttpAuthProvider::new(&base, Duration::from_secs(5)).unwrap();

        let user = provider.login("08031234567", "secret").await.unwrap();
        assert_eq!(user.id, "chw-0803");
        assert_eq!(user.name, "Hauwa Bello");
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let base = serve(login_router()).await;
        let provider = HttpAuthProvider::new(&base, Duration::from_secs(5)).unwrap();

        let err = provider.login("08031234567", "guess").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn malformed_identity_is_rejected() {
        let router = Router::new().route(
            "/auth/login",
            post(|| async { Json(serde_json::json!({"ok": true})) }),
        );
        let base = serve(router).await;
        let provider = HttpAuthProvider::new(&base, Duration::from_secs(5)).unwrap();

        let err = provider.login("08031234567", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }
}
