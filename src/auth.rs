//! Credential-based session issuer backing the admin gate.
//!
//! Only the contract matters to the rest of the crate; [`MemoryAuth`] is a
//! plain table of accounts with no hardening.

use std::collections::BTreeMap;
use std::future::{Future, ready};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::AuthOptions;

const UID_LEN: usize = 28;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: String,
    pub email: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("email and password are required")]
    MissingCredentials,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("session is no longer signed in")]
    SignedOut,
}

pub trait AuthService: Send + Sync {
    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, AuthError>> + Send;

    fn sign_out(&self) -> impl Future<Output = ()> + Send;

    /// Receiver that observes every sign-in and sign-out.
    fn on_session_changed(&self) -> watch::Receiver<Option<Session>>;

    /// Short-lived token for the given session.
    fn session_token(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<String, AuthError>> + Send;
}

struct Account {
    password: String,
    uid: String,
}

struct IssuedToken {
    value: String,
    issued_at: Instant,
}

pub struct MemoryAuth {
    accounts: BTreeMap<String, Account>,
    token_ttl: Duration,
    token: Mutex<Option<IssuedToken>>,
    session: watch::Sender<Option<Session>>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl MemoryAuth {
    pub fn new(options: &AuthOptions) -> Self {
        let accounts = options
            .users
            .iter()
            .map(|(email, password)| {
                let uid = rand::rng()
                    .sample_iter(&Alphanumeric)
                    .take(UID_LEN)
                    .map(char::from)
                    .collect();
                (
                    normalize_email(email),
                    Account {
                        password: password.clone(),
                        uid,
                    },
                )
            })
            .collect();
        let (session, _) = watch::channel(None);
        Self {
            accounts,
            token_ttl: options.token_ttl,
            token: Mutex::new(None),
            session,
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    fn authenticate(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let account = self
            .accounts
            .get(&email)
            .filter(|a| a.password == password)
            .ok_or(AuthError::InvalidCredentials)?;
        let session = Session {
            uid: account.uid.clone(),
            email,
        };
        *self.token.lock() = None;
        self.session.send_replace(Some(session.clone()));
        info!(email = %session.email, "admin signed in");
        Ok(session)
    }

    fn end_session(&self) {
        *self.token.lock() = None;
        if let Some(previous) = self.session.send_replace(None) {
            info!(email = %previous.email, "admin signed out");
        }
    }

    fn token_for(&self, session: &Session) -> Result<String, AuthError> {
        let signed_in = self.session.borrow().as_ref().map(|s| s.uid.clone());
        if signed_in.as_deref() != Some(session.uid.as_str()) {
            return Err(AuthError::SignedOut);
        }
        let mut token = self.token.lock();
        if let Some(issued) = token.as_ref() {
            if issued.issued_at.elapsed() < self.token_ttl {
                return Ok(issued.value.clone());
            }
        }
        let value = format!("{:032x}", rand::rng().random::<u128>());
        debug!(uid = %session.uid, "minted session token");
        *token = Some(IssuedToken {
            value: value.clone(),
            issued_at: Instant::now(),
        });
        Ok(value)
    }
}

impl AuthService for MemoryAuth {
    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, AuthError>> + Send {
        ready(self.authenticate(email, password))
    }

    fn sign_out(&self) -> impl Future<Output = ()> + Send {
        async move { self.end_session() }
    }

    fn on_session_changed(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    fn session_token(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<String, AuthError>> + Send {
        ready(self.token_for(session))
    }
}
