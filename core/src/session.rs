use anyhow::Result;

/// External auth collaborator.
///
/// The CLI implements this with reqwest; implementations that are async
/// internally block on a stored runtime handle, so callers treat the trait
/// as synchronous.
pub trait AuthProvider: Send + Sync {
    /// Exchange a pre-issued token for a stable user identifier.
    fn exchange_token(&self, token: &str) -> Result<String>;

    /// Create a fresh anonymous identity.
    fn sign_in_anonymously(&self) -> Result<String>;
}

/// The resolved user identity used to scope all store operations.
///
/// Created once per process by [`bootstrap`] and never mutated after first
/// resolution. A session without a user id is permanently not ready: both
/// subscribing and mutating are blocked on readiness.
#[derive(Debug, Clone)]
pub struct UserSession {
    user_id: Option<String>,
}

impl UserSession {
    #[must_use]
    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    #[must_use]
    pub fn not_ready() -> Self {
        Self { user_id: None }
    }

    #[must_use]
    pub fn ready(&self) -> bool {
        self.user_id.is_some()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// Resolve the session identity on startup.
///
/// With a token, attempt the exchange first; a failed exchange logs a warning
/// and falls back to anonymous sign-in. A failed anonymous sign-in logs an
/// error and leaves the session not ready. No retry in either case.
pub fn bootstrap(provider: &dyn AuthProvider, token: Option<&str>) -> UserSession {
    if let Some(token) = token {
        match provider.exchange_token(token) {
            Ok(user_id) => {
                tracing::debug!("token exchange resolved user {user_id}");
                return UserSession::with_user(user_id);
            }
            Err(e) => {
                tracing::warn!("token exchange failed, falling back to anonymous: {e:#}");
            }
        }
    }
    match provider.sign_in_anonymously() {
        Ok(user_id) => {
            tracing::debug!("anonymous sign-in resolved user {user_id}");
            UserSession::with_user(user_id)
        }
        Err(e) => {
            tracing::error!("anonymous sign-in failed, session stays unusable: {e:#}");
            UserSession::not_ready()
        }
    }
}
