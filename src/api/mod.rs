//! HTTP server: HTML pages, JSON API, and shared handler state

pub mod auth;
pub mod children;
pub mod error;
pub mod flash;
pub mod geofences;
pub mod health;
pub mod location;
pub mod pages;
pub mod rate_limit;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration as StdDuration;

use axum::Router;
use axum_extra::extract::cookie::Key;
use chrono::Duration;
use rand::Rng;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{BUNDLED_STATIC_DIR, Config, DEFAULT_LOW_BATTERY_THRESHOLD, DEFAULT_PORT};
use crate::db::{AlertRepo, ChildRepo, DbPool, GeofenceRepo, SessionRepo, UserRepo};
use crate::security::{PairingManager, hash_password};
use crate::tracking::LocationTracker;
use crate::{Error, Result};

pub use error::{ApiError, PageError};

/// How long login sessions last
#[derive(Debug, Clone, Copy)]
pub struct SessionTtl {
    /// Plain login
    pub standard: Duration,
    /// Login with "remember me"
    pub remember: Duration,
}

impl Default for SessionTtl {
    fn default() -> Self {
        Self {
            standard: Duration::hours(24),
            remember: Duration::days(30),
        }
    }
}

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub users: UserRepo,
    pub children: ChildRepo,
    pub geofences: GeofenceRepo,
    pub alerts: AlertRepo,
    pub sessions: SessionRepo,
    pub pairing: PairingManager,
    pub tracker: LocationTracker,
    /// Signs the session and flash cookies
    pub cookie_key: Key,
    pub session_ttl: SessionTtl,
    pub bcrypt_cost: u32,
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
    /// Hash checked when a login names no active account
    decoy_hash: OnceLock<String>,
}

impl ApiState {
    /// bcrypt hash at the configured cost that no password is expected to match
    ///
    /// Built on first use.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails
    pub fn decoy_hash(&self) -> Result<String> {
        if let Some(hash) = self.decoy_hash.get() {
            return Ok(hash.clone());
        }
        let mut secret = [0u8; 32];
        rand::thread_rng().fill(&mut secret[..]);
        let hash = hash_password(&hex::encode(secret), self.bcrypt_cost)?;
        Ok(self.decoy_hash.get_or_init(|| hash).clone())
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    db: DbPool,
    cookie_key: Key,
    bind_address: IpAddr,
    port: u16,
    static_dir: Option<PathBuf>,
    session_ttl: SessionTtl,
    session_purge_interval: StdDuration,
    bcrypt_cost: u32,
    low_battery_threshold: f64,
    rate_limit_per_minute: Option<u32>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    ///
    /// `key_material` signs cookies; it must be kept stable across restarts
    /// for sessions to survive them.
    #[must_use]
    pub fn new(db: DbPool, key_material: &[u8; 64]) -> Self {
        Self {
            db,
            cookie_key: Key::from(key_material),
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            static_dir: Some(PathBuf::from(BUNDLED_STATIC_DIR)),
            session_ttl: SessionTtl::default(),
            session_purge_interval: StdDuration::from_secs(3600),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
            rate_limit_per_minute: None,
        }
    }

    /// Create a builder with every setting taken from loaded configuration
    #[must_use]
    pub fn from_config(db: DbPool, config: &Config) -> Self {
        let mut builder = Self::new(db, &config.security.cookie_key_material())
            .bind_address(config.server.bind_address)
            .port(config.server.port)
            .session_ttl(SessionTtl {
                standard: config.security.session_ttl(false),
                remember: config.security.session_ttl(true),
            })
            .session_purge_interval(StdDuration::from_secs(
                config.security.session_purge_interval_secs,
            ))
            .bcrypt_cost(config.security.bcrypt_cost)
            .low_battery_threshold(config.alerts.low_battery_threshold);

        builder = builder.static_dir(config.server.static_dir.clone());
        if let Some(rpm) = config.server.rate_limit_per_minute {
            builder = builder.rate_limit(rpm);
        }
        builder
    }

    #[must_use]
    pub const fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn static_dir(mut self, dir: PathBuf) -> Self {
        self.static_dir = Some(dir);
        self
    }

    #[must_use]
    pub const fn session_ttl(mut self, ttl: SessionTtl) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn session_purge_interval(mut self, interval: StdDuration) -> Self {
        self.session_purge_interval = interval;
        self
    }

    #[must_use]
    pub const fn bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    #[must_use]
    pub const fn low_battery_threshold(mut self, percent: f64) -> Self {
        self.low_battery_threshold = percent;
        self
    }

    /// Limit requests per minute across all clients and routes
    #[must_use]
    pub const fn rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit_per_minute = Some(requests_per_minute);
        self
    }

    #[must_use]
    pub fn build(self) -> ApiServer {
        let users = UserRepo::new(self.db.clone());
        let children = ChildRepo::new(self.db.clone());
        let geofences = GeofenceRepo::new(self.db.clone());
        let alerts = AlertRepo::new(self.db.clone());
        let sessions = SessionRepo::new(self.db.clone());

        let pairing = PairingManager::new(children.clone());
        let tracker = LocationTracker::new(self.db.clone(), self.low_battery_threshold);

        let rate_limiter = self.rate_limit_per_minute.map(rate_limit::create_limiter);

        let state = Arc::new(ApiState {
            db: self.db,
            users,
            children,
            geofences,
            alerts,
            sessions,
            pairing,
            tracker,
            cookie_key: self.cookie_key,
            session_ttl: self.session_ttl,
            bcrypt_cost: self.bcrypt_cost,
            rate_limiter,
            decoy_hash: OnceLock::new(),
        });

        ApiServer {
            state,
            addr: SocketAddr::new(self.bind_address, self.port),
            static_dir: self.static_dir,
            session_purge_interval: self.session_purge_interval,
        }
    }
}

pub struct ApiServer {
    state: Arc<ApiState>,
    addr: SocketAddr,
    static_dir: Option<PathBuf>,
    session_purge_interval: StdDuration,
}

impl ApiServer {
    /// Shared handler state
    #[must_use]
    pub fn state(&self) -> Arc<ApiState> {
        self.state.clone()
    }

    /// Build the full application router
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .merge(pages::router(self.state.clone()))
            .merge(location::router(self.state.clone()))
            .merge(geofences::router(self.state.clone()))
            .merge(children::router(self.state.clone()))
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        if let Some(static_dir) = &self.static_dir {
            router = router.nest_service("/static", ServeDir::new(static_dir));
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        let router = router.layer(axum::middleware::from_fn_with_state(
            self.state.clone(),
            rate_limit::rate_limit_middleware,
        ));

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(addr = %self.addr, "API server listening");

        let purge = spawn_session_purge(self.state.sessions.clone(), self.session_purge_interval);

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")));

        purge.abort();
        tracing::info!("API server stopped");
        result
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

/// Periodically delete expired sessions
fn spawn_session_purge(
    sessions: SessionRepo,
    interval: StdDuration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = sessions.purge_expired() {
                tracing::warn!(error = %e, "session purge failed");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;
    use crate::security::verify_password;

    #[test]
    fn test_decoy_hash_built_once() {
        let server = ApiServerBuilder::new(init_memory().unwrap(), &[1u8; 64])
            .bcrypt_cost(4)
            .build();
        let state = server.state();

        let hash = state.decoy_hash().unwrap();
        assert!(hash.starts_with("$2"));
        assert_eq!(state.decoy_hash().unwrap(), hash);
        assert!(!verify_password("", &hash));
        assert!(!verify_password("password", &hash));
    }

    #[test]
    fn test_bundled_static_dir_is_default() {
        let server = ApiServerBuilder::new(init_memory().unwrap(), &[1u8; 64]).build();
        assert_eq!(
            server.static_dir.as_deref(),
            Some(std::path::Path::new(BUNDLED_STATIC_DIR))
        );
    }
}
