//! Login, refresh-with-rotation and logout over a [`SessionStore`].
//!
//! Session states and their transitions live in `warden_core::session`; this
//! service applies them. Every operation reads the clock once.

use std::sync::Arc;

use serde::Serialize;
use warden_core::abuse::AbuseGuard;
use warden_core::clock::Clock;
use warden_core::error::CoreError;
use warden_core::hashing::{
    derive_session_id, generate_refresh_token, hash_refresh_token, is_well_formed_refresh_token,
};
use warden_core::rate_limit::RateLimitPolicy;
use warden_core::session::{
    refresh_transition, RefreshTransition, RotateOutcome, Session, SessionError, SessionStore,
};
use warden_core::types::{DbId, Timestamp};
use warden_core::users::{UserCredentials, UserDirectory};

use crate::auth::jwt::{generate_access_token, JwtConfig};
use crate::auth::password::verify_password;
use crate::middleware::client::ClientContext;

/// Abuse-guard route key for login attempts.
pub const LOGIN_ROUTE: &str = "auth:login";
/// Abuse-guard route key for refresh attempts.
pub const REFRESH_ROUTE: &str = "auth:refresh";

/// Access and refresh tokens handed to the client.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub session_id: String,
}

/// What a logout should revoke.
#[derive(Debug, Clone, Default)]
pub struct LogoutScope {
    pub all: bool,
    pub session_id: Option<String>,
}

/// A live session as shown to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Whether this is the session the caller's access token belongs to.
    pub current: bool,
}

pub struct AuthSessionService {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    guard: Arc<AbuseGuard>,
    clock: Arc<dyn Clock>,
    jwt: JwtConfig,
    login_policy: RateLimitPolicy,
    refresh_policy: RateLimitPolicy,
}

impl AuthSessionService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        guard: Arc<AbuseGuard>,
        clock: Arc<dyn Clock>,
        jwt: JwtConfig,
        login_policy: RateLimitPolicy,
        refresh_policy: RateLimitPolicy,
    ) -> Self {
        Self {
            sessions,
            users,
            guard,
            clock,
            jwt,
            login_policy,
            refresh_policy,
        }
    }

    /// Verify credentials and open a new session.
    ///
    /// Unknown users and wrong passwords both yield `Unauthorized` so the
    /// response does not reveal which usernames exist.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client: &ClientContext,
    ) -> Result<TokenPair, CoreError> {
        self.guard
            .enforce(LOGIN_ROUTE, &client.identity, &self.login_policy)
            .await?;
        let now = self.clock.now();

        let user = self
            .users
            .find_by_username(username)
            .await?
            .ok_or_else(|| CoreError::Unauthorized("Invalid username or password".into()))?;

        let password_valid = verify_password(password, &user.password_hash)
            .map_err(|e| CoreError::Internal(format!("Password verification error: {e}")))?;
        if !password_valid {
            tracing::info!(user_id = user.id, "Login rejected: wrong password");
            return Err(CoreError::Unauthorized(
                "Invalid username or password".into(),
            ));
        }

        if !user.is_active {
            return Err(CoreError::Forbidden("Account is deactivated".into()));
        }

        let (refresh_token, refresh_hash) = generate_refresh_token();
        let session = Session::issue(
            user.id,
            refresh_hash,
            client.identity.ip_hash.clone(),
            client.user_agent.clone(),
            now,
            self.jwt.session_ttl(),
        );
        self.sessions.create(&session).await?;

        tracing::info!(user_id = user.id, session_id = %session.session_id, "User logged in");
        self.token_pair(&user, &session.session_id, refresh_token, now)
    }

    /// Exchange a refresh token for a new pair, rotating the session.
    ///
    /// Presenting a token whose session was already rotated revokes every
    /// session of its user before failing with `REFRESH_REUSE_DETECTED`.
    pub async fn refresh(
        &self,
        presented_token: &str,
        client: &ClientContext,
    ) -> Result<TokenPair, CoreError> {
        self.guard
            .enforce(REFRESH_ROUTE, &client.identity, &self.refresh_policy)
            .await?;
        if !is_well_formed_refresh_token(presented_token) {
            return Err(CoreError::Validation("Malformed refresh token".into()));
        }
        let now = self.clock.now();
        let session_id = derive_session_id(&hash_refresh_token(presented_token));

        let current = self.sessions.find(&session_id).await?;
        let current = match refresh_transition(current.as_ref(), now) {
            RefreshTransition::Rotate => current,
            RefreshTransition::ReuseDetected { user_id } => {
                return Err(self.handle_reuse(user_id, &session_id, now).await);
            }
            RefreshTransition::Reject(e) => return Err(e.into()),
        }
        .ok_or(SessionError::NotFound)?;

        let user = self
            .users
            .find_by_id(current.user_id)
            .await?
            .ok_or_else(|| CoreError::Unauthorized("User no longer exists".into()))?;
        if !user.is_active {
            return Err(CoreError::Forbidden("Account is deactivated".into()));
        }

        // Successors sort strictly after their predecessor even if the clock stalls or steps back.
        let issued_at = now.max(current.created_at + chrono::Duration::milliseconds(1));
        let (refresh_token, refresh_hash) = generate_refresh_token();
        let successor = Session::issue(
            user.id,
            refresh_hash,
            client.identity.ip_hash.clone(),
            client.user_agent.clone(),
            issued_at,
            self.jwt.session_ttl(),
        );

        match self.sessions.rotate(&session_id, &successor, now).await? {
            RotateOutcome::Rotated => {}
            RotateOutcome::Missing => return Err(SessionError::NotFound.into()),
            // A concurrent refresh or revoke got there first; classify what it left.
            RotateOutcome::Lost(latest) => {
                return Err(match refresh_transition(Some(&latest), now) {
                    RefreshTransition::ReuseDetected { user_id } => {
                        self.handle_reuse(user_id, &session_id, now).await
                    }
                    RefreshTransition::Reject(e) => e.into(),
                    RefreshTransition::Rotate => {
                        CoreError::Internal("Session rotation lost to a live session".into())
                    }
                });
            }
        }

        tracing::debug!(
            user_id = user.id,
            from = %session_id,
            to = %successor.session_id,
            "Session rotated"
        );
        self.token_pair(&user, &successor.session_id, refresh_token, now)
    }

    /// The single response to a replayed refresh token: revoke everything the
    /// user holds, then report the reuse.
    async fn handle_reuse(&self, user_id: DbId, session_id: &str, now: Timestamp) -> CoreError {
        tracing::warn!(
            user_id,
            session_id = %session_id,
            "Refresh token reuse detected, revoking all sessions"
        );
        match self.sessions.revoke_all_for_user(user_id, now).await {
            Ok(revoked) => {
                tracing::warn!(user_id, revoked, "Sessions revoked after token reuse");
                SessionError::ReuseDetected.into()
            }
            Err(e) => e.into(),
        }
    }

    /// Revoke the caller's sessions per `scope`. Returns how many were revoked.
    ///
    /// With neither `all` nor an explicit id, the caller's current session
    /// (from its access token) is revoked.
    pub async fn logout(
        &self,
        user_id: DbId,
        current_session_id: &str,
        scope: &LogoutScope,
    ) -> Result<u64, CoreError> {
        let now = self.clock.now();

        if scope.all {
            let revoked = self.sessions.revoke_all_for_user(user_id, now).await?;
            tracing::info!(user_id, revoked, "Logged out everywhere");
            return Ok(revoked);
        }

        let target = match scope.session_id.as_deref() {
            Some(id) => {
                let owned = self
                    .sessions
                    .find(id)
                    .await?
                    .is_some_and(|s| s.user_id == user_id);
                if !owned {
                    return Err(CoreError::Forbidden(
                        "Session does not belong to the caller".into(),
                    ));
                }
                id
            }
            None => current_session_id,
        };

        let revoked = self.sessions.revoke(target, now).await?;
        tracing::info!(user_id, session_id = %target, "Session logged out");
        Ok(u64::from(revoked))
    }

    /// The caller's live sessions, newest first.
    pub async fn list_sessions(
        &self,
        user_id: DbId,
        current_session_id: &str,
    ) -> Result<Vec<SessionSummary>, CoreError> {
        let now = self.clock.now();
        let sessions = self.sessions.list_for_user(user_id).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.is_live(now))
            .map(|s| SessionSummary {
                current: s.session_id == current_session_id,
                session_id: s.session_id,
                created_at: s.created_at,
                expires_at: s.expires_at,
                ip: s.ip,
                user_agent: s.user_agent,
            })
            .collect())
    }

    fn token_pair(
        &self,
        user: &UserCredentials,
        session_id: &str,
        refresh_token: String,
        now: Timestamp,
    ) -> Result<TokenPair, CoreError> {
        let access_token = generate_access_token(user.id, &user.role, session_id, &self.jwt, now)
            .map_err(|e| CoreError::Internal(format!("Token generation error: {e}")))?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.jwt.access_expires_in(),
            session_id: session_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Utc;
    use warden_core::clock::ManualClock;
    use warden_core::error::StoreError;
    use warden_core::rate_limit::{
        FailureMode, MemoryRateLimitStore, RateLimitDecision, RateLimitStore,
    };
    use warden_core::session::MemorySessionStore;
    use warden_core::types::EpochMillis;
    use warden_core::users::MemoryUserDirectory;

    use super::*;
    use crate::auth::password::hash_password;

    const PASSWORD: &str = "correct horse battery staple";

    struct UnavailableRateLimitStore;

    #[async_trait]
    impl RateLimitStore for UnavailableRateLimitStore {
        async fn check_and_record(
            &self,
            _key: &str,
            _policy: &RateLimitPolicy,
            _now_ms: EpochMillis,
        ) -> Result<RateLimitDecision, StoreError> {
            Err(StoreError::Unavailable("counter store down".into()))
        }

        fn failure_mode(&self) -> FailureMode {
            FailureMode::FailClosed
        }

        fn backend_name(&self) -> &'static str {
            "unavailable"
        }
    }

    fn jwt() -> JwtConfig {
        JwtConfig {
            secret: "unit-test-secret".into(),
            access_token_expiry_mins: 15,
            refresh_token_expiry_days: 7,
        }
    }

    async fn service_with(
        rate_limits: Arc<dyn RateLimitStore>,
    ) -> (AuthSessionService, Arc<MemorySessionStore>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_at(Utc::now()));
        let sessions = Arc::new(MemorySessionStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        users
            .insert(UserCredentials {
                id: 7,
                username: "carol".into(),
                password_hash: hash_password(PASSWORD).unwrap(),
                role: "member".into(),
                is_active: true,
            })
            .await;
        let guard = Arc::new(AbuseGuard::new(rate_limits, Arc::clone(&clock)));
        let service = AuthSessionService::new(
            sessions.clone(),
            users,
            guard,
            clock,
            jwt(),
            RateLimitPolicy::new(5, 300, 900),
            RateLimitPolicy::new(30, 60, 300),
        );
        (service, sessions)
    }

    #[tokio::test]
    async fn racing_refreshes_of_one_token_yield_one_pair() {
        let (service, sessions) = service_with(Arc::new(MemoryRateLimitStore::new())).await;
        let client = ClientContext::default();
        let pair = service.login("carol", PASSWORD, &client).await.unwrap();

        let (first, second) = tokio::join!(
            service.refresh(&pair.refresh_token, &client),
            service.refresh(&pair.refresh_token, &client),
        );

        let (ok, err) = match (first, second) {
            (Ok(p), Err(e)) | (Err(e), Ok(p)) => (p, e),
            other => panic!("expected exactly one success, got {other:?}"),
        };
        assert_matches!(err, CoreError::Session(SessionError::ReuseDetected));
        // The replay revoked the winner's successor too.
        let successor = sessions.find(&ok.session_id).await.unwrap().unwrap();
        assert!(successor.revoked_at.is_some());
    }

    #[tokio::test]
    async fn unavailable_counter_store_rejects_login() {
        let (service, sessions) = service_with(Arc::new(UnavailableRateLimitStore)).await;

        let err = service
            .login("carol", PASSWORD, &ClientContext::default())
            .await
            .unwrap_err();

        assert_matches!(err, CoreError::Store(StoreError::Unavailable(_)));
        assert!(sessions.all_for_user(7).await.is_empty());
    }

    #[tokio::test]
    async fn logout_without_scope_revokes_only_current_session() {
        let (service, sessions) = service_with(Arc::new(MemoryRateLimitStore::new())).await;
        let client = ClientContext::default();
        let current = service.login("carol", PASSWORD, &client).await.unwrap();
        let other = service.login("carol", PASSWORD, &client).await.unwrap();

        let revoked = service
            .logout(7, &current.session_id, &LogoutScope::default())
            .await
            .unwrap();

        assert_eq!(revoked, 1);
        let other = sessions.find(&other.session_id).await.unwrap().unwrap();
        assert!(other.revoked_at.is_none());
    }
}
