use std::sync::Arc;

use warden_core::abuse::AbuseGuard;
use warden_core::clock::Clock;
use warden_core::rate_limit::RateLimitStore;
use warden_core::session::SessionStore;
use warden_core::users::UserDirectory;
use warden_core::visitor::{VisitorSessionTracker, VisitorStore};

use crate::auth::service::AuthSessionService;
use crate::config::ServerConfig;

/// The backends a deployment selected, before they are wired into services.
pub struct Backends {
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserDirectory>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub visitors: Arc<dyn VisitorStore>,
    pub clock: Arc<dyn Clock>,
}

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub auth: Arc<AuthSessionService>,
    pub guard: Arc<AbuseGuard>,
    pub tracker: Arc<VisitorSessionTracker>,
    /// Kept for health checks.
    pub sessions: Arc<dyn SessionStore>,
}

impl AppState {
    /// Wire the services over the selected backends.
    pub fn new(config: ServerConfig, backends: Backends) -> Self {
        let guard = Arc::new(AbuseGuard::new(
            backends.rate_limits,
            Arc::clone(&backends.clock),
        ));
        let auth = Arc::new(AuthSessionService::new(
            Arc::clone(&backends.sessions),
            backends.users,
            Arc::clone(&guard),
            Arc::clone(&backends.clock),
            config.jwt.clone(),
            config.login_rate_limit,
            config.refresh_rate_limit,
        ));
        let tracker = Arc::new(VisitorSessionTracker::new(
            backends.visitors,
            backends.clock,
            config.visit_policy,
        ));

        Self {
            config: Arc::new(config),
            auth,
            guard,
            tracker,
            sessions: backends.sessions,
        }
    }
}
