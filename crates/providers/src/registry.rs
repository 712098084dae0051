//! Provider registry: holds instantiated LLM provider adapters and the
//! role → provider assignments the kernel's task-execution path consults.

use std::collections::HashMap;
use std::sync::Arc;

use sa_domain::error::{Error, Result};

use crate::traits::LlmProvider;

/// Whether the registry may boot with zero registered providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPolicy {
    /// Boot regardless; callers get `Error::NotFound` until a provider is
    /// registered. Matches the "gateway boots, LLM endpoints fail until
    /// configured" posture documented for the degraded-health scenario.
    AllowNone,
    /// Refuse to finish startup unless at least one provider registered
    /// successfully.
    RequireOne,
}

#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens so they never
/// leak into logs or readiness output.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    roles: HashMap<String, String>,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            providers: HashMap::new(),
            roles: HashMap::new(),
            init_errors: Vec::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_string();
        tracing::info!(provider_id = %id, "registered LLM provider");
        self.providers.insert(id, provider);
    }

    /// Record a provider that failed to initialize without aborting the
    /// rest of the registry build. The error message is masked before
    /// storage.
    pub fn record_init_error(&mut self, provider_id: impl Into<String>, error: &Error) {
        let provider_id = provider_id.into();
        let masked = mask_secrets(&error.to_string());
        tracing::warn!(provider_id = %provider_id, error = %masked, "failed to initialize LLM provider, skipping");
        self.init_errors.push(ProviderInitError {
            provider_id,
            error: masked,
        });
    }

    pub fn assign_role(&mut self, role: impl Into<String>, provider_id: impl Into<String>) {
        self.roles.insert(role.into(), provider_id.into());
    }

    /// Apply the startup policy now that registration is finished.
    pub fn finalize(&self, policy: StartupPolicy) -> Result<()> {
        if self.providers.is_empty() && policy == StartupPolicy::RequireOne {
            return Err(Error::Config(
                "no LLM providers registered (startup policy = require_one)".into(),
            ));
        }
        if self.providers.is_empty() {
            tracing::warn!(
                failed_providers = self.init_errors.len(),
                "no LLM providers registered (startup policy = allow_none); \
                 provider-backed tasks will fail until one is registered"
            );
        }
        Ok(())
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn for_role(&self, role: &str) -> Option<Arc<dyn LlmProvider>> {
        let provider_id = self.roles.get(role)?;
        self.providers.get(provider_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
