//! Shared service context (§9 design notes: "pass an explicit service
//! context through request handling; internally each store is an
//! encapsulated object with its own synchronization").

use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditLog;
use crate::bus::EventBus;
use crate::config::GatewayConfig;
use crate::keyring::Keyring;
use crate::nonce::NonceCache;
use crate::policy::dynamic::DynamicCapabilityStore;
use crate::policy::engine::PolicyEngine;
use crate::policy::static_loader::StaticPolicyLoader;
use crate::session::SessionTokens;

pub struct GatewayState {
    pub config: GatewayConfig,
    pub keyring: Keyring,
    pub audit: AuditLog,
    pub nonces: NonceCache,
    pub sessions: SessionTokens,
    pub capabilities: Arc<DynamicCapabilityStore>,
    pub policy: PolicyEngine,
    pub bus: EventBus,
}

impl GatewayState {
    pub fn build(config: GatewayConfig) -> anyhow::Result<Arc<Self>> {
        let secret = config.session_secret()?;
        let keyring = Keyring::open(&config.keyring_db)?;
        let audit = AuditLog::open(&config.audit_log)?;
        let nonces = NonceCache::new(Duration::from_secs(config.nonce_ttl_secs));
        let sessions = SessionTokens::new(&secret);
        let capabilities = Arc::new(DynamicCapabilityStore::open(&config.capabilities_db)?);
        let loader = StaticPolicyLoader::new(&config.policy_file);
        let policy = PolicyEngine::new(loader, Arc::clone(&capabilities))?;
        let bus = EventBus::new();

        Ok(Arc::new(GatewayState {
            config,
            keyring,
            audit,
            nonces,
            sessions,
            capabilities,
            policy,
            bus,
        }))
    }
}
