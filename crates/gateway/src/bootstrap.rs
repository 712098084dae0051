//! Wires the kernel's nine components together leaves-first, the order
//! named in the component design: circuit breaker, event bus, and
//! persistence have no dependencies on the rest; sandbox depends on
//! governance; policy depends on governance; lifecycle depends on
//! persistence, sandbox, and the event bus.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use sa_domain::config::{Config, StoreKind};
use sa_kernel::audit_sink::AuditLog;
use sa_kernel::circuit_breaker::CircuitBreaker;
use sa_kernel::event_bus::EventBus;
use sa_kernel::governance::Governance;
use sa_kernel::lifecycle::LifecycleManager;
use sa_kernel::persistence::{FileCheckpointStore, MemoryCheckpointStore, PersistenceManager};
use sa_kernel::policy::PolicyEngine;
use sa_kernel::sandbox::Sandbox;
use sa_kernel::scheduler::Scheduler;
use sa_providers::{EchoProvider, ProviderRegistry, StartupPolicy};

use crate::state::AppState;

const SANCTION_SWEEP_JOB: &str = "governance.sanction_sweep";
const BAN_ENFORCEMENT_JOB: &str = "governance.ban_enforcement";

/// Build the full kernel graph, run crash recovery, register background
/// jobs, and return ready-to-serve [`AppState`]. Does not start the
/// scheduler or bind the HTTP listener; callers do that once the router
/// is built.
pub async fn bootstrap(config: Arc<Config>) -> anyhow::Result<AppState> {
    config.validate().context("config validation")?;

    let audit = Arc::new(AuditLog::new());
    let event_bus = Arc::new(EventBus::new());

    let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
    let store: Arc<dyn sa_kernel::persistence::CheckpointStore> = match config.persistence.store {
        StoreKind::File => match std::fs::create_dir_all(&config.persistence.checkpoint_dir) {
            Ok(()) => Arc::new(FileCheckpointStore::new(config.persistence.checkpoint_dir.clone().into())),
            Err(err) if config.persistence.require_persistent_store => {
                return Err(err).context("creating checkpoint directory");
            }
            Err(err) => {
                tracing::warn!(
                    dir = %config.persistence.checkpoint_dir,
                    error = %err,
                    "checkpoint directory unreachable, degrading to in-memory store"
                );
                breaker.force_open();
                Arc::new(MemoryCheckpointStore::new())
            }
        },
        StoreKind::Memory => Arc::new(MemoryCheckpointStore::new()),
    };
    let persistence = Arc::new(PersistenceManager::new(store, breaker.clone()));

    let governance = Arc::new(Governance::new(audit.clone()));
    let sandbox = Arc::new(Sandbox::new(
        governance.clone(),
        audit.clone(),
        config.sandbox.enforce_permissions,
    ));
    let policy = Arc::new(PolicyEngine::new(governance.clone()));
    if config.enforce_production_hardening && policy.is_permissive() {
        anyhow::bail!(
            "ENFORCE_PRODUCTION_HARDENING is set but the policy engine has no enabled policies; \
             refusing to start with a permissive policy engine"
        );
    }
    let lifecycle = Arc::new(LifecycleManager::new(
        persistence.clone(),
        sandbox.clone(),
        audit.clone(),
        event_bus.clone(),
        config.manifest_signing.clone(),
    ));

    // No durable manifest registry exists yet (see DESIGN.md); recovery runs
    // against whatever manifests the caller already knows, which at a cold
    // boot is none. Checkpoints found with no matching manifest are logged
    // and skipped rather than failing the whole pass.
    let restored = lifecycle.recover(&HashMap::new()).await.context("crash recovery")?;
    tracing::info!(restored, "crash recovery pass complete");

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(EchoProvider::new("echo")));
    providers.assign_role("default", "echo");
    providers
        .finalize(StartupPolicy::AllowNone)
        .context("provider registry startup policy")?;
    let providers = Arc::new(providers);

    let scheduler = Arc::new(Scheduler::new(config.scheduler.shutdown_grace_period_ms));
    register_background_jobs(&scheduler, &governance, &lifecycle, &config);

    let hash_env = |var: Option<&str>| -> Option<Vec<u8>> {
        var.and_then(|var| std::env::var(var).ok())
            .filter(|token| !token.is_empty())
            .map(|token| {
                use sha2::{Digest, Sha256};
                Sha256::digest(token.as_bytes()).to_vec()
            })
    };

    let admin_token_hash = hash_env(config.server.admin_token_env.as_deref());
    if admin_token_hash.is_some() {
        tracing::info!("admin bearer-token auth enabled");
    } else {
        tracing::warn!("admin bearer-token auth DISABLED — set the configured admin_token_env to enable");
    }

    let api_token_hash = hash_env(config.server.api_token_env.as_deref());
    if api_token_hash.is_some() {
        tracing::info!("envelope bearer-token auth enabled");
    } else {
        tracing::warn!("envelope bearer-token auth DISABLED — set the configured api_token_env to enable");
    }

    Ok(AppState {
        config,
        lifecycle,
        sandbox,
        policy,
        governance,
        persistence,
        breaker,
        scheduler,
        event_bus,
        providers,
        admin_token_hash,
        api_token_hash,
    })
}

/// Register the two periodic jobs §4.8 names: sweeping expired sanctions
/// and terminating agents whose `ban` sanction is still pending enforcement.
fn register_background_jobs(
    scheduler: &Arc<Scheduler>,
    governance: &Arc<Governance>,
    lifecycle: &Arc<LifecycleManager>,
    config: &Config,
) {
    let interval_ms = config.scheduler.sanction_sweep_interval_ms;

    let gov = governance.clone();
    scheduler.register(
        SANCTION_SWEEP_JOB,
        "sweep expired sanctions",
        interval_ms,
        Arc::new(move || {
            let gov = gov.clone();
            Box::pin(async move {
                let swept = gov.sweep_expired_sanctions();
                if swept > 0 {
                    tracing::info!(swept, "sanction sweep expired entries");
                }
                Ok(())
            })
        }),
    );

    let gov = governance.clone();
    let lifecycle = lifecycle.clone();
    scheduler.register(
        BAN_ENFORCEMENT_JOB,
        "enforce pending bans",
        interval_ms,
        Arc::new(move || {
            let gov = gov.clone();
            let lifecycle = lifecycle.clone();
            Box::pin(async move {
                let pending = gov.drain_pending_bans();
                if !pending.is_empty() {
                    lifecycle.enforce_pending_bans(pending).await;
                }
                Ok(())
            })
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.persistence.store = StoreKind::Memory;
        config
    }

    #[tokio::test]
    async fn boots_with_default_role_provider_assigned() {
        let state = bootstrap(Arc::new(memory_config())).await.unwrap();
        assert!(state.providers.for_role("default").is_some());
    }

    #[tokio::test]
    async fn cold_boot_recovery_is_a_noop_with_no_manifests() {
        let state = bootstrap(Arc::new(memory_config())).await.unwrap();
        assert!(state.lifecycle.list_agents().is_empty());
    }

    /// A path with a regular file as one of its components: `create_dir_all`
    /// fails on this with `ENOTDIR` regardless of the caller's privileges,
    /// unlike a plain nonexistent path under `/`, which `root` can create.
    fn unreachable_checkpoint_dir() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let unreachable = blocker.join("checkpoints").to_string_lossy().into_owned();
        (dir, unreachable)
    }

    #[tokio::test]
    async fn s4_unreachable_store_boots_degraded_when_not_required() {
        let (_dir, unreachable) = unreachable_checkpoint_dir();
        let mut config = Config::default();
        config.persistence.store = StoreKind::File;
        config.persistence.checkpoint_dir = unreachable;
        config.persistence.require_persistent_store = false;

        let state = bootstrap(Arc::new(config)).await.unwrap();
        assert_eq!(state.persistence_breaker_state(), sa_kernel::circuit_breaker::CircuitState::Open);
    }

    #[tokio::test]
    async fn unreachable_store_still_fails_boot_when_required() {
        let (_dir, unreachable) = unreachable_checkpoint_dir();
        let mut config = Config::default();
        config.persistence.store = StoreKind::File;
        config.persistence.checkpoint_dir = unreachable;
        config.persistence.require_persistent_store = true;

        assert!(bootstrap(Arc::new(config)).await.is_err());
    }

    #[tokio::test]
    async fn hardening_refuses_boot_with_a_permissive_policy_engine() {
        let mut config = memory_config();
        config.enforce_production_hardening = true;

        assert!(bootstrap(Arc::new(config)).await.is_err());
    }

    #[tokio::test]
    async fn admin_auth_disabled_when_env_var_unset() {
        let mut config = memory_config();
        config.server.admin_token_env = Some("SA_GATEWAY_TEST_UNSET_TOKEN".into());
        std::env::remove_var("SA_GATEWAY_TEST_UNSET_TOKEN");
        let state = bootstrap(Arc::new(config)).await.unwrap();
        assert!(state.admin_token_hash.is_none());
    }

    #[tokio::test]
    async fn background_jobs_are_registered_but_not_started() {
        let state = bootstrap(Arc::new(memory_config())).await.unwrap();
        let jobs = state.scheduler.list_jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.run_count == 0));
    }
}
