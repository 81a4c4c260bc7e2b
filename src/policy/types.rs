//! Shared policy types (§3).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Publish,
    Subscribe,
}

/// One entry of the static, file-backed ruleset (§6: `subjects: { <name>: {
/// pubs:[], subs:[], labels:[] } }`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubjectRule {
    #[serde(default)]
    pub pubs: HashSet<String>,
    #[serde(default)]
    pub subs: HashSet<String>,
    #[serde(default)]
    pub labels: HashSet<String>,
}

/// Root of the static policy file. The `roles` map is carried through for
/// fidelity with the file format but is unused by the core decision
/// procedure (§3: "an (unused-in-core) attribute bag").
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StaticPolicyFile {
    #[serde(default)]
    pub subjects: HashMap<String, SubjectRule>,
    #[serde(default)]
    pub roles: HashMap<String, serde_json::Value>,
}

/// Per-AE dynamic capability declaration (§4.7). The latest declaration for
/// an ae_id supersedes the prior one entirely; there is no merge across
/// declarations.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DynamicCapability {
    #[serde(default)]
    pub publishes: HashSet<String>,
    #[serde(default)]
    pub subscribes: HashSet<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// The derived, never-stored union of static and dynamic state used to
/// answer can_publish/can_subscribe (§3). Built fresh on every rebuild and
/// published behind an `arc_swap::ArcSwap` so readers never block.
#[derive(Debug, Clone, Default)]
pub struct EffectivePolicy {
    pub(crate) static_file: StaticPolicyFile,
    pub(crate) dynamic: HashMap<String, DynamicCapability>,
}

impl EffectivePolicy {
    pub fn build(static_file: StaticPolicyFile, dynamic: HashMap<String, DynamicCapability>) -> Self {
        EffectivePolicy {
            static_file,
            dynamic,
        }
    }

    /// §4.8 decision procedure, identical shape for publish and subscribe.
    pub fn decide(&self, ae_id: &str, subject: &str, direction: Direction) -> Decision {
        let rule = self.static_file.subjects.get(subject);
        let dyn_decl = self.dynamic.get(ae_id);

        let subject_known = rule.is_some()
            || self
                .dynamic
                .values()
                .any(|d| d.publishes.contains(subject) || d.subscribes.contains(subject));

        if !subject_known {
            return Decision::Deny(DenyReason::UnknownSubject);
        }

        if let Some(rule) = rule {
            let static_members = match direction {
                Direction::Publish => &rule.pubs,
                Direction::Subscribe => &rule.subs,
            };
            if static_members.contains(ae_id) {
                return Decision::Allow;
            }
        }

        if let Some(decl) = dyn_decl {
            let dynamic_members = match direction {
                Direction::Publish => &decl.publishes,
                Direction::Subscribe => &decl.subscribes,
            };
            if dynamic_members.contains(subject) {
                return Decision::Allow;
            }
        }

        Decision::Deny(DenyReason::NotAuthorized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    UnknownSubject,
    NotAuthorized,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::UnknownSubject => "UnknownSubject",
            DenyReason::NotAuthorized => "NotAuthorized",
        }
    }
}
