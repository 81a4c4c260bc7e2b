//! Startup configuration.
//!
//! Mirrors the teacher's `ServerConfig::parse()` entrypoint: a `clap`
//! derive struct read once at process start, plus one required secret
//! read from the environment whose absence is a fatal startup error.

use std::collections::HashMap;

use clap::Parser;

/// Name of the environment variable carrying the session-grant HMAC secret.
pub const SESSION_SECRET_ENV: &str = "GATEWAY_SESSION_SECRET";

#[derive(Debug, Clone, Parser)]
#[command(name = "ae-mesh-gateway", about = "Admission, authorization, and verified-emission gateway")]
pub struct GatewayConfig {
    /// Address to listen on for the HTTP surface.
    #[arg(long, env = "GATEWAY_LISTEN_ADDR", default_value = "0.0.0.0:8443")]
    pub listen_addr: String,

    /// Path to the static policy YAML file.
    #[arg(long, env = "GATEWAY_POLICY_FILE", default_value = "policy.yaml")]
    pub policy_file: String,

    /// Path to the keyring SQLite database.
    #[arg(long, env = "GATEWAY_KEYRING_DB", default_value = "keyring.sqlite3")]
    pub keyring_db: String,

    /// Path to the dynamic-capabilities SQLite database.
    #[arg(long, env = "GATEWAY_CAPABILITIES_DB", default_value = "capabilities.sqlite3")]
    pub capabilities_db: String,

    /// Path to the append-only audit log file.
    #[arg(long, env = "GATEWAY_AUDIT_LOG", default_value = "audit.log")]
    pub audit_log: String,

    /// Nonce time-to-live, in seconds.
    #[arg(long, env = "GATEWAY_NONCE_TTL_SECS", default_value_t = 120)]
    pub nonce_ttl_secs: u64,

    /// Interval at which the static policy file is polled for changes.
    #[arg(long, env = "GATEWAY_POLICY_POLL_SECS", default_value_t = 1)]
    pub policy_poll_secs: u64,

    /// Default session-grant TTL, in seconds, used when a profile has no
    /// explicit entry in `--profile-ttl`.
    #[arg(long, env = "GATEWAY_DEFAULT_PROFILE_TTL_SECS", default_value_t = 900)]
    pub default_profile_ttl_secs: u64,

    /// Emit JSON-formatted logs instead of human-readable ones.
    #[arg(long, env = "GATEWAY_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Per-profile session TTL overrides, `name=seconds`, may be repeated.
    #[arg(long = "profile-ttl", value_parser = parse_profile_ttl)]
    pub profile_ttls: Vec<(String, u64)>,
}

fn parse_profile_ttl(raw: &str) -> Result<(String, u64), String> {
    let (name, secs) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=seconds, got {raw:?}"))?;
    let secs: u64 = secs
        .parse()
        .map_err(|_| format!("invalid ttl seconds in {raw:?}"))?;
    Ok((name.to_string(), secs))
}

impl GatewayConfig {
    /// The session-signing secret. Reading this is fatal at startup if unset.
    pub fn session_secret(&self) -> anyhow::Result<String> {
        std::env::var(SESSION_SECRET_ENV)
            .map_err(|_| anyhow::anyhow!("{SESSION_SECRET_ENV} is not set; refusing to start"))
    }

    /// Resolve a profile name to its session TTL, in seconds.
    ///
    /// Returns `None` for an unknown profile — callers MUST surface this as
    /// an error rather than silently falling back to the default (§9 open
    /// question: "surface an error on unknown profile").
    pub fn profile_ttl_secs(&self, profile: &str) -> Option<u64> {
        let overrides: HashMap<&str, u64> = self
            .profile_ttls
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        if let Some(ttl) = overrides.get(profile) {
            return Some(*ttl);
        }
        if profile == "default" {
            return Some(self.default_profile_ttl_secs);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_profile_resolves_to_none() {
        let cfg = GatewayConfig {
            listen_addr: "x".into(),
            policy_file: "x".into(),
            keyring_db: "x".into(),
            capabilities_db: "x".into(),
            audit_log: "x".into(),
            nonce_ttl_secs: 120,
            policy_poll_secs: 1,
            default_profile_ttl_secs: 900,
            log_json: false,
            profile_ttls: vec![],
        };
        assert_eq!(cfg.profile_ttl_secs("default"), Some(900));
        assert_eq!(cfg.profile_ttl_secs("nope"), None);
    }

    #[test]
    fn profile_override_takes_precedence() {
        let mut cfg = GatewayConfig {
            listen_addr: "x".into(),
            policy_file: "x".into(),
            keyring_db: "x".into(),
            capabilities_db: "x".into(),
            audit_log: "x".into(),
            nonce_ttl_secs: 120,
            policy_poll_secs: 1,
            default_profile_ttl_secs: 900,
            log_json: false,
            profile_ttls: vec![],
        };
        cfg.profile_ttls.push(("short-lived".into(), 30));
        assert_eq!(cfg.profile_ttl_secs("short-lived"), Some(30));
    }
}
