//! REST Auth Gateway
//!
//! Client for the hosted auth endpoints. Each call maps one-to-one onto a
//! service endpoint; session state lives in `AuthService`, not here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{AuthUser, DomainError, DomainResult, UserId};
use crate::repository::RemoteConfig;

use super::{AuthGateway, Session};

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: WireUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            user: AuthUser {
                id: UserId(self.user.id),
                email: self.user.email,
            },
            access_token: self.access_token,
        }
    }
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// REST `AuthGateway` backend
#[derive(Clone)]
pub struct RestAuth {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl RestAuth {
    pub fn new(config: RemoteConfig) -> Self {
        RestAuth {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!(
            "{}/auth/v1/{}",
            self.config.url.trim_end_matches('/'),
            path
        )
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.auth_url(path))
            .header("apikey", &self.config.anon_key)
    }

    async fn check(response: reqwest::Response, what: &str) -> DomainResult<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DomainError::Remote(format!(
                "{} failed: {} {}",
                what, status, body
            )))
        }
    }

    async fn token_request(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> DomainResult<Session> {
        let url = format!("{}?grant_type={}", self.auth_url("token"), grant_type);
        let response = self
            .http
            .post(url)
            .header("apikey", &self.config.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("token request failed: {}", e)))?;
        Self::check(response, "token request")
            .await?
            .json::<TokenResponse>()
            .await
            .map(TokenResponse::into_session)
            .map_err(|e| DomainError::Remote(format!("token decode failed: {}", e)))
    }
}

#[async_trait]
impl AuthGateway for RestAuth {
    async fn sign_up(&self, email: &str, password: &str) -> DomainResult<()> {
        let response = self
            .post("signup")
            .json(&Credentials { email, password })
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("sign up failed: {}", e)))?;
        Self::check(response, "sign up").await?;
        Ok(())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> DomainResult<Session> {
        self.token_request("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn send_magic_link(&self, email: &str) -> DomainResult<()> {
        let response = self
            .post("otp")
            .json(&json!({ "email": email }))
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("magic link failed: {}", e)))?;
        Self::check(response, "magic link").await?;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> DomainResult<()> {
        let response = self
            .post("recover")
            .json(&json!({ "email": email }))
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("password reset failed: {}", e)))?;
        Self::check(response, "password reset").await?;
        Ok(())
    }

    async fn exchange_code(&self, code: &str) -> DomainResult<Session> {
        self.token_request("pkce", json!({ "auth_code": code })).await
    }

    async fn update_password(&self, session: &Session, new_password: &str) -> DomainResult<()> {
        let response = self
            .http
            .put(self.auth_url("user"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&session.access_token)
            .json(&json!({ "password": new_password }))
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("password update failed: {}", e)))?;
        Self::check(response, "password update").await?;
        Ok(())
    }

    async fn sign_out(&self, session: &Session) -> DomainResult<()> {
        let response = self
            .post("logout")
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("sign out failed: {}", e)))?;
        Self::check(response, "sign out").await?;
        Ok(())
    }
}
