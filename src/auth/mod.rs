//! Auth Layer
//!
//! Credential validation and session flows. Tokens, cookies, and OAuth
//! redirects belong to the hosted auth service; this layer validates input
//! before anything leaves the client and tracks the signed-in user.

mod rest;

pub use rest::RestAuth;

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{AuthUser, DomainError, DomainResult};

/// Minimum password length, counted after trimming
pub const MIN_PASSWORD_CHARS: usize = 6;

/// An established session: the user plus the bearer token for data access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: AuthUser,
    pub access_token: String,
}

/// Contract for the hosted auth service
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Register a new account; the service mails a confirmation link
    async fn sign_up(&self, email: &str, password: &str) -> DomainResult<()>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> DomainResult<Session>;

    /// Mail a one-time sign-in link
    async fn send_magic_link(&self, email: &str) -> DomainResult<()>;

    /// Mail a password recovery link
    async fn send_password_reset(&self, email: &str) -> DomainResult<()>;

    /// Exchange a callback code (magic link, OAuth, recovery) for a session
    async fn exchange_code(&self, code: &str) -> DomainResult<Session>;

    async fn update_password(&self, session: &Session, new_password: &str) -> DomainResult<()>;

    async fn sign_out(&self, session: &Session) -> DomainResult<()>;
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

/// Validate and trim an email address
pub fn validate_email(email: &str) -> DomainResult<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation("email cannot be empty".to_string()));
    }
    if !email_regex().is_match(trimmed) {
        return Err(DomainError::Validation(
            "please enter a valid email address".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Validate a credential pair the way the sign-in/sign-up forms do
///
/// Returns the trimmed email. The password crosses the wire untrimmed; the
/// trimmed form is only used for the emptiness and length checks.
pub fn validate_credentials(email: &str, password: &str) -> DomainResult<String> {
    let email = validate_email(email)?;
    let trimmed = password.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation(
            "password cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().count() < MIN_PASSWORD_CHARS {
        return Err(DomainError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_CHARS
        )));
    }
    Ok(email)
}

/// Session tracking plus validated intents over an [`AuthGateway`]
pub struct AuthService {
    gateway: Arc<dyn AuthGateway>,
    session: Mutex<Option<Session>>,
}

impl AuthService {
    pub fn new(gateway: Arc<dyn AuthGateway>) -> Self {
        AuthService {
            gateway,
            session: Mutex::new(None),
        }
    }

    /// The signed-in user, if any
    pub fn current_user(&self) -> Option<AuthUser> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|session| session.user.clone())
    }

    pub fn session(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> DomainResult<()> {
        let email = validate_credentials(email, password)?;
        self.gateway.sign_up(&email, password).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> DomainResult<AuthUser> {
        let email = validate_credentials(email, password)?;
        let session = self.gateway.sign_in_with_password(&email, password).await?;
        let user = session.user.clone();
        *self.session.lock().unwrap() = Some(session);
        log::info!("signed in as {}", user.id);
        Ok(user)
    }

    pub async fn send_magic_link(&self, email: &str) -> DomainResult<()> {
        let email = validate_email(email)?;
        self.gateway.send_magic_link(&email).await
    }

    pub async fn forgot_password(&self, email: &str) -> DomainResult<()> {
        let email = validate_email(email)?;
        self.gateway.send_password_reset(&email).await
    }

    /// Finish a magic-link or OAuth callback by exchanging its code
    pub async fn complete_sign_in(&self, code: &str) -> DomainResult<AuthUser> {
        if code.trim().is_empty() {
            return Err(DomainError::Validation(
                "missing authorization code".to_string(),
            ));
        }
        let session = self.gateway.exchange_code(code.trim()).await?;
        let user = session.user.clone();
        *self.session.lock().unwrap() = Some(session);
        Ok(user)
    }

    /// Recovery flow: exchange the emailed code, then set the new password
    pub async fn update_password(
        &self,
        code: &str,
        password: &str,
        confirm_password: &str,
    ) -> DomainResult<()> {
        if code.trim().is_empty() {
            return Err(DomainError::Validation(
                "missing authorization code".to_string(),
            ));
        }
        let password = password.trim();
        let confirm = confirm_password.trim();
        if password.is_empty() || confirm.is_empty() {
            return Err(DomainError::Validation(
                "password and confirm password are required".to_string(),
            ));
        }
        if password != confirm {
            return Err(DomainError::Validation(
                "passwords do not match".to_string(),
            ));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(DomainError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_CHARS
            )));
        }
        let session = self.gateway.exchange_code(code.trim()).await?;
        self.gateway.update_password(&session, password).await
    }

    pub async fn sign_out(&self) -> DomainResult<()> {
        let session = self.session.lock().unwrap().take();
        if let Some(session) = session {
            self.gateway.sign_out(&session).await?;
            log::info!("signed out {}", session.user.id);
        }
        Ok(())
    }
}
