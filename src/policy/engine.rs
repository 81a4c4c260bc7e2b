//! Policy Engine (C8).
//!
//! Wraps an `arc_swap::ArcSwap<EffectivePolicy>` so that publish/subscribe
//! decisions never block on a rebuild: readers always see either the old
//! snapshot or the new one, never a partial one (§5 snapshot atomicity).
//! Rebuilds are triggered explicitly by the static loader's poll loop and
//! by dynamic capability writes (§4.8's "rebuild signal").

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::dynamic::DynamicCapabilityStore;
use super::static_loader::StaticPolicyLoader;
pub use super::types::Decision;
use super::types::{Direction, EffectivePolicy};

pub struct PolicyEngine {
    snapshot: ArcSwap<EffectivePolicy>,
    loader: Mutex<StaticPolicyLoader>,
    dynamic: Arc<DynamicCapabilityStore>,
}

impl PolicyEngine {
    pub fn new(mut loader: StaticPolicyLoader, dynamic: Arc<DynamicCapabilityStore>) -> anyhow::Result<Self> {
        let static_file = loader.load()?;
        let dynamic_snapshot = dynamic.list()?;
        let snapshot = EffectivePolicy::build(static_file, dynamic_snapshot);
        Ok(PolicyEngine {
            snapshot: ArcSwap::from_pointee(snapshot),
            loader: Mutex::new(loader),
            dynamic,
        })
    }

    pub fn can_publish(&self, ae_id: &str, subject: &str) -> Decision {
        self.snapshot.load().decide(ae_id, subject, Direction::Publish)
    }

    pub fn can_subscribe(&self, ae_id: &str, subject: &str) -> Decision {
        self.snapshot.load().decide(ae_id, subject, Direction::Subscribe)
    }

    /// Poll the static file for changes and rebuild the snapshot if it did.
    /// On a parse failure the previous snapshot is left untouched and the
    /// error is returned for the caller to audit (§4.6).
    pub fn poll_static(&self) -> anyhow::Result<bool> {
        let mut loader = self.loader.lock();
        match loader.poll()? {
            Some(static_file) => {
                let dynamic_snapshot = self.dynamic.list()?;
                self.snapshot
                    .store(Arc::new(EffectivePolicy::build(static_file, dynamic_snapshot)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rebuild the snapshot after a dynamic capability write, keeping the
    /// current static file in place.
    pub fn rebuild_dynamic(&self) -> anyhow::Result<()> {
        let current = self.snapshot.load();
        let dynamic_snapshot = self.dynamic.list()?;
        self.snapshot
            .store(Arc::new(EffectivePolicy::build(current.static_file.clone(), dynamic_snapshot)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::DenyReason;
    use std::fs;

    fn engine_with_policy(yaml: &str) -> (tempfile::TempDir, PolicyEngine) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        fs::write(&path, yaml).unwrap();
        let loader = StaticPolicyLoader::new(&path);
        let dynamic = Arc::new(DynamicCapabilityStore::open_memory().unwrap());
        let engine = PolicyEngine::new(loader, dynamic).unwrap();
        (dir, engine)
    }

    #[test]
    fn static_grant_allows_publish() {
        let (_dir, engine) = engine_with_policy("subjects:\n  fused.track:\n    pubs: [pub_ae]\n");
        assert_eq!(engine.can_publish("pub_ae", "fused.track"), Decision::Allow);
    }

    #[test]
    fn unknown_subject_denies_both_directions() {
        let (_dir, engine) = engine_with_policy("subjects: {}\n");
        assert_eq!(
            engine.can_publish("pub_ae", "nope.subj"),
            Decision::Deny(DenyReason::UnknownSubject)
        );
        assert_eq!(
            engine.can_subscribe("pub_ae", "nope.subj"),
            Decision::Deny(DenyReason::UnknownSubject)
        );
    }

    #[test]
    fn dynamic_write_rebuild_is_visible_immediately() {
        let (_dir, engine) = engine_with_policy("subjects: {}\n");
        assert_eq!(
            engine.can_publish("pub_ae", "fusion.topic"),
            Decision::Deny(DenyReason::UnknownSubject)
        );

        let mut cap = crate::policy::types::DynamicCapability::default();
        cap.publishes.insert("fusion.topic".to_string());
        engine.dynamic.put("pub_ae", &cap).unwrap();
        engine.rebuild_dynamic().unwrap();

        assert_eq!(engine.can_publish("pub_ae", "fusion.topic"), Decision::Allow);
    }

    #[test]
    fn poll_static_reloads_on_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        fs::write(&path, "subjects: {}\n").unwrap();
        let loader = StaticPolicyLoader::new(&path);
        let dynamic = Arc::new(DynamicCapabilityStore::open_memory().unwrap());
        let engine = PolicyEngine::new(loader, dynamic).unwrap();

        assert_eq!(
            engine.can_publish("pub_ae", "fused.track"),
            Decision::Deny(DenyReason::UnknownSubject)
        );

        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::write(&path, "subjects:\n  fused.track:\n    pubs: [pub_ae]\n").unwrap();
        assert!(engine.poll_static().unwrap());
        assert_eq!(engine.can_publish("pub_ae", "fused.track"), Decision::Allow);
    }
}
