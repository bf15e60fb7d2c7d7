//! Portal session management.
//!
//! The portal session lives in the HTTP client's cookie jar and is established through a
//! five-step SAML single-sign-on flow:
//!
//! 1. announce the login on the portal's ajax endpoint and pull the redirect path out of the reply
//! 2. follow the redirect to the identity provider's login endpoint
//! 3. post login and password there and read the signed assertion from the returned form
//! 4. post the assertion to the portal's assertion consumer, which sets the session cookies
//! 5. fetch the redirect path again, then check the home page no longer shows the login form
//!
//! Logins are single-flight: every caller that finds the session expired queues on one lock, and
//! callers that queued behind a login reuse its outcome instead of starting another.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{AuthError, WatcherError, WatcherResult};
use crate::portal::{markup, Portal};

#[derive(Debug, Default)]
struct LoginRecord {
    /// Completed login attempts, successful or not
    attempts: u64,
    last_succeeded: bool,
    /// Set once the identity provider rejected our credentials; never cleared
    credentials_rejected: bool,
}

pub struct SessionManager {
    portal: Arc<dyn Portal>,
    login: String,
    password: String,
    login_lock: tokio::sync::Mutex<()>,
    record: Mutex<LoginRecord>,
}

impl SessionManager {
    pub fn new(portal: Arc<dyn Portal>, login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            portal,
            login: login.into(),
            password: password.into(),
            login_lock: tokio::sync::Mutex::new(()),
            record: Mutex::new(LoginRecord::default()),
        }
    }

    fn record(&self) -> MutexGuard<'_, LoginRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_not_rejected(&self) -> WatcherResult<()> {
        if self.record().credentials_rejected {
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(())
    }

    /// Run the SSO sequence now, waiting for any login already in progress first
    pub async fn authenticate(&self) -> WatcherResult<()> {
        let _guard = self.login_lock.lock().await;
        self.check_not_rejected()?;
        self.login_locked().await
    }

    /// Whether the portal still recognises our session
    pub async fn is_session_valid(&self) -> WatcherResult<bool> {
        let expired = self.portal.fetch_home().await?;
        Ok(!expired)
    }

    /// Make sure the session is live, logging in again if it expired
    pub async fn ensure_valid(&self) -> WatcherResult<()> {
        self.check_not_rejected()?;
        let seen = self.record().attempts;
        if self.is_session_valid().await? {
            return Ok(());
        }
        tracing::info!("Token expired, reauthenticating");
        self.reauthenticate(seen).await
    }

    /// Log in again after a page showed the login form, without re-checking the home page
    pub async fn recover_expired(&self) -> WatcherResult<()> {
        self.check_not_rejected()?;
        let seen = self.record().attempts;
        tracing::info!("Session expired during a request, reauthenticating");
        self.reauthenticate(seen).await
    }

    /// Log in unless another caller completed a login since we observed attempt `seen`
    async fn reauthenticate(&self, seen: u64) -> WatcherResult<()> {
        let _guard = self.login_lock.lock().await;

        {
            let record = self.record();
            if record.credentials_rejected {
                return Err(AuthError::InvalidCredentials.into());
            }
            if record.attempts != seen {
                tracing::debug!("Reusing the outcome of a concurrent login");
                return if record.last_succeeded {
                    Ok(())
                } else {
                    Err(AuthError::SessionNotEstablished.into())
                };
            }
        }

        self.login_locked().await
    }

    /// Caller must hold `login_lock`
    async fn login_locked(&self) -> WatcherResult<()> {
        tracing::info!("Getting auth cookies");
        let result = self.run_sso().await;

        {
            let mut record = self.record();
            record.attempts += 1;
            record.last_succeeded = result.is_ok();
            if matches!(&result, Err(e) if e.is_terminal()) {
                record.credentials_rejected = true;
            }
        }

        match &result {
            Ok(()) => tracing::info!("Authenticated"),
            Err(e) => tracing::error!("Authentication failed: {}", e),
        }
        result
    }

    async fn run_sso(&self) -> WatcherResult<()> {
        let payload = self.portal.post_identity_assertion(&self.login).await?;
        let redirect_path = markup::extract_redirect_path(&payload).ok_or_else(|| {
            WatcherError::parse("identity assertion response carries no redirect path")
        })?;
        tracing::debug!("SSO redirect path: {}", redirect_path);

        let idp_url = self.portal.follow_redirect(&redirect_path).await?;
        tracing::debug!("Identity provider endpoint: {}", idp_url);

        let assertion = self
            .portal
            .post_credentials(&idp_url, &self.login, &self.password)
            .await?;
        if assertion.trim().is_empty() {
            return Err(AuthError::InvalidCredentials.into());
        }

        self.portal.post_assertion(&assertion, &redirect_path).await?;

        let landing = self.portal.follow_redirect(&redirect_path).await?;
        tracing::debug!("SSO landed on {}", landing);
        if self.portal.fetch_home().await? {
            return Err(AuthError::SessionNotEstablished.into());
        }
        Ok(())
    }
}
