use std::sync::Arc;

use sa_domain::config::Config;
use sa_kernel::circuit_breaker::{CircuitBreaker, CircuitState, CircuitStats};
use sa_kernel::event_bus::EventBus;
use sa_kernel::governance::Governance;
use sa_kernel::lifecycle::LifecycleManager;
use sa_kernel::persistence::PersistenceManager;
use sa_kernel::policy::PolicyEngine;
use sa_kernel::sandbox::Sandbox;
use sa_kernel::scheduler::Scheduler;
use sa_providers::ProviderRegistry;

/// Shared application state passed to all API handlers. Every field is the
/// top of one kernel component's `Arc` graph; handlers never reach past
/// `lifecycle`/`sandbox`/`policy`/`governance` into their internals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lifecycle: Arc<LifecycleManager>,
    pub sandbox: Arc<Sandbox>,
    pub policy: Arc<PolicyEngine>,
    pub governance: Arc<Governance>,
    pub persistence: Arc<PersistenceManager>,
    /// Same breaker instance handed to `PersistenceManager`; kept here too
    /// so `/health` and `/v1/metrics` can read its state without the
    /// persistence manager needing to expose it itself.
    pub breaker: Arc<CircuitBreaker>,
    pub scheduler: Arc<Scheduler>,
    pub event_bus: Arc<EventBus>,
    pub providers: Arc<ProviderRegistry>,
    /// SHA-256 hash of the admin bearer token, read once at startup.
    /// `None` means admin endpoints are reachable without auth (dev mode).
    pub admin_token_hash: Option<Vec<u8>>,
    /// SHA-256 hash of the envelope-level API bearer token, checked by the
    /// `auth` request type. `None` means the envelope endpoint is open.
    pub api_token_hash: Option<Vec<u8>>,
}

impl AppState {
    pub fn persistence_breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker_stats(&self) -> CircuitStats {
        self.breaker.stats()
    }
}
