//! Keyring Store (C1).
//!
//! Persistent AE identity and trust state, backed by a single SQLite file
//! (`rusqlite`, WAL mode), following the teacher's `PolicyStore`/`Db`
//! migrate-on-open pattern. Writes are serialized through a single
//! `Mutex<Connection>`; reads share the same lock since SQLite's own
//! file-level locking makes a separate read path unnecessary at this scale.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    Untrusted,
    Trusted,
    Revoked,
}

impl TrustState {
    fn as_str(&self) -> &'static str {
        match self {
            TrustState::Untrusted => "untrusted",
            TrustState::Trusted => "trusted",
            TrustState::Revoked => "revoked",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "trusted" => TrustState::Trusted,
            "revoked" => TrustState::Revoked,
            _ => TrustState::Untrusted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyringRecord {
    pub ae_id: String,
    pub pubkey: [u8; 32],
    pub roles: HashSet<String>,
    pub state: TrustState,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KeyringRecord {
    /// A record is usable for verification only while trusted and unexpired
    /// (§3: "a record with state = revoked or (expiry set and elapsed) is
    /// never usable for verification").
    pub fn is_trusted(&self) -> bool {
        if self.state != TrustState::Trusted {
            return false;
        }
        match self.expires_at {
            Some(expiry) => expiry > Utc::now(),
            None => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    #[error("no keyring record for this ae_id")]
    NotFound,
    #[error("upsert would lower trust state")]
    WouldLowerTrust,
    #[error("keyring store error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub struct Keyring {
    conn: Mutex<Connection>,
}

impl Keyring {
    pub fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS keyring (
                ae_id TEXT PRIMARY KEY,
                pubkey BLOB NOT NULL,
                roles TEXT NOT NULL,
                status TEXT NOT NULL,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Keyring {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS keyring (
                ae_id TEXT PRIMARY KEY,
                pubkey BLOB NOT NULL,
                roles TEXT NOT NULL,
                status TEXT NOT NULL,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Keyring {
            conn: Mutex::new(conn),
        })
    }

    /// Create or update a record. Ordinary enrollment (`privileged = false`)
    /// preserves any existing trust state (§4.1: "Upsert preserves existing
    /// trust state unless the caller is privileged").
    ///
    /// Privileged callers (admin routes) may rotate the pubkey, which resets
    /// trust to `untrusted` — a key change must re-clear admission — unless
    /// `requested_state` names an explicit target, in which case that
    /// transition is checked against the same monotonicity rule as
    /// [`Self::set_state`] and the whole upsert is refused with
    /// `WouldLowerTrust` rather than silently adjusted (§7: "Conflict:
    /// keyring upsert refused (would lower trust)").
    pub fn upsert(
        &self,
        ae_id: &str,
        pubkey: [u8; 32],
        roles: HashSet<String>,
        expiry: Option<DateTime<Utc>>,
        privileged: bool,
        requested_state: Option<TrustState>,
    ) -> Result<KeyringRecord, KeyringError> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let existing = fetch(&conn, ae_id)?;
        let current_state = existing.as_ref().map(|r| r.state).unwrap_or(TrustState::Untrusted);

        let state = if !privileged {
            current_state
        } else {
            match requested_state {
                Some(requested) => {
                    if !allowed_transition(current_state, requested) {
                        return Err(KeyringError::WouldLowerTrust);
                    }
                    requested
                }
                None => TrustState::Untrusted,
            }
        };
        let created_at = existing.map(|r| r.created_at).unwrap_or(now);
        let roles_json = serde_json::to_string(&roles).unwrap_or_else(|_| "[]".to_string());

        conn.execute(
            "INSERT INTO keyring (ae_id, pubkey, roles, status, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(ae_id) DO UPDATE SET
                pubkey = excluded.pubkey,
                roles = excluded.roles,
                status = excluded.status,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                ae_id,
                pubkey.to_vec(),
                roles_json,
                state.as_str(),
                expiry.map(|e| e.to_rfc3339()),
                created_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(KeyringRecord {
            ae_id: ae_id.to_string(),
            pubkey,
            roles,
            state,
            expires_at: expiry,
            created_at,
            updated_at: now,
        })
    }

    pub fn get(&self, ae_id: &str) -> Result<KeyringRecord, KeyringError> {
        let conn = self.conn.lock();
        fetch(&conn, ae_id)?.ok_or(KeyringError::NotFound)
    }

    /// Directly set trust state (e.g. admission's untrusted->trusted, or an
    /// admin revoke). State transitions are monotonic except
    /// operator-issued revocation (§3): revoked is reachable from any
    /// state and is terminal, but trust is never silently lowered back to
    /// untrusted once granted. A disallowed transition is refused wholesale
    /// with `WouldLowerTrust` rather than applied (§7 Conflict).
    pub fn set_state(&self, ae_id: &str, state: TrustState) -> Result<(), KeyringError> {
        let conn = self.conn.lock();
        let current = fetch(&conn, ae_id)?.ok_or(KeyringError::NotFound)?.state;
        if !allowed_transition(current, state) {
            return Err(KeyringError::WouldLowerTrust);
        }
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE keyring SET status = ?1, updated_at = ?2 WHERE ae_id = ?3",
            params![state.as_str(), now, ae_id],
        )?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<KeyringRecord>, KeyringError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT ae_id FROM keyring ORDER BY ae_id")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        ids.into_iter()
            .map(|id| -> Result<KeyringRecord, KeyringError> {
                fetch(&conn, &id)?.ok_or(KeyringError::NotFound)
            })
            .collect()
    }
}

/// Revoked is reachable from anywhere and terminal; trusted is reachable
/// only from untrusted (admission) and never demoted back to untrusted.
fn allowed_transition(from: TrustState, to: TrustState) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (TrustState::Revoked, _) => false,
        (_, TrustState::Revoked) => true,
        (TrustState::Untrusted, TrustState::Trusted) => true,
        (TrustState::Trusted, TrustState::Untrusted) => false,
        _ => false,
    }
}

fn fetch(conn: &Connection, ae_id: &str) -> Result<Option<KeyringRecord>, rusqlite::Error> {
    conn.query_row(
        "SELECT ae_id, pubkey, roles, status, expires_at, created_at, updated_at
         FROM keyring WHERE ae_id = ?1",
        params![ae_id],
        |row| {
            let pubkey_vec: Vec<u8> = row.get(1)?;
            let mut pubkey = [0u8; 32];
            if pubkey_vec.len() == 32 {
                pubkey.copy_from_slice(&pubkey_vec);
            }
            let roles_json: String = row.get(2)?;
            let roles: HashSet<String> = serde_json::from_str(&roles_json).unwrap_or_default();
            let status: String = row.get(3)?;
            let expires_at: Option<String> = row.get(4)?;
            let created_at: String = row.get(5)?;
            let updated_at: String = row.get(6)?;

            Ok(KeyringRecord {
                ae_id: row.get(0)?,
                pubkey,
                roles,
                state: TrustState::parse(&status),
                expires_at: expires_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                updated_at: DateTime::parse_from_rfc3339(&updated_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(rs: &[&str]) -> HashSet<String> {
        rs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let kr = Keyring::open_memory().unwrap();
        kr.upsert("pub_ae", [1u8; 32], roles(&["producer"]), None, false, None)
            .unwrap();
        let record = kr.get("pub_ae").unwrap();
        assert_eq!(record.pubkey, [1u8; 32]);
        assert_eq!(record.state, TrustState::Untrusted);
    }

    #[test]
    fn unprivileged_upsert_preserves_trust_state() {
        let kr = Keyring::open_memory().unwrap();
        kr.upsert("pub_ae", [1u8; 32], roles(&[]), None, false, None).unwrap();
        kr.set_state("pub_ae", TrustState::Trusted).unwrap();
        kr.upsert("pub_ae", [2u8; 32], roles(&[]), None, false, None).unwrap();
        let record = kr.get("pub_ae").unwrap();
        assert_eq!(record.state, TrustState::Trusted);
        assert_eq!(record.pubkey, [2u8; 32]);
    }

    #[test]
    fn privileged_upsert_resets_to_untrusted() {
        let kr = Keyring::open_memory().unwrap();
        kr.upsert("pub_ae", [1u8; 32], roles(&[]), None, false, None).unwrap();
        kr.set_state("pub_ae", TrustState::Trusted).unwrap();
        kr.upsert("pub_ae", [2u8; 32], roles(&[]), None, true, None).unwrap();
        let record = kr.get("pub_ae").unwrap();
        assert_eq!(record.state, TrustState::Untrusted);
    }

    #[test]
    fn revoked_record_is_never_trusted() {
        let kr = Keyring::open_memory().unwrap();
        kr.upsert("pub_ae", [1u8; 32], roles(&[]), None, false, None).unwrap();
        kr.set_state("pub_ae", TrustState::Trusted).unwrap();
        kr.set_state("pub_ae", TrustState::Revoked).unwrap();
        let record = kr.get("pub_ae").unwrap();
        assert!(!record.is_trusted());
    }

    #[test]
    fn expired_record_is_never_trusted() {
        let kr = Keyring::open_memory().unwrap();
        let past = Utc::now() - chrono::Duration::seconds(10);
        kr.upsert("pub_ae", [1u8; 32], roles(&[]), Some(past), false, None)
            .unwrap();
        kr.set_state("pub_ae", TrustState::Trusted).unwrap();
        let record = kr.get("pub_ae").unwrap();
        assert!(!record.is_trusted());
    }

    #[test]
    fn trusted_cannot_be_demoted_to_untrusted() {
        let kr = Keyring::open_memory().unwrap();
        kr.upsert("pub_ae", [1u8; 32], roles(&[]), None, false, None).unwrap();
        kr.set_state("pub_ae", TrustState::Trusted).unwrap();
        assert!(matches!(
            kr.set_state("pub_ae", TrustState::Untrusted),
            Err(KeyringError::WouldLowerTrust)
        ));
        assert_eq!(kr.get("pub_ae").unwrap().state, TrustState::Trusted);
    }

    #[test]
    fn revoked_is_terminal() {
        let kr = Keyring::open_memory().unwrap();
        kr.upsert("pub_ae", [1u8; 32], roles(&[]), None, false, None).unwrap();
        kr.set_state("pub_ae", TrustState::Revoked).unwrap();
        assert!(matches!(
            kr.set_state("pub_ae", TrustState::Trusted),
            Err(KeyringError::WouldLowerTrust)
        ));
        assert!(matches!(
            kr.set_state("pub_ae", TrustState::Untrusted),
            Err(KeyringError::WouldLowerTrust)
        ));
    }

    #[test]
    fn revoke_is_reachable_from_any_state() {
        let kr = Keyring::open_memory().unwrap();
        kr.upsert("pub_ae", [1u8; 32], roles(&[]), None, false, None).unwrap();
        assert!(kr.set_state("pub_ae", TrustState::Revoked).is_ok());
    }

    #[test]
    fn privileged_upsert_with_explicit_state_refuses_to_lower_trust() {
        let kr = Keyring::open_memory().unwrap();
        kr.upsert("pub_ae", [1u8; 32], roles(&[]), None, false, None).unwrap();
        kr.set_state("pub_ae", TrustState::Revoked).unwrap();
        assert!(matches!(
            kr.upsert("pub_ae", [2u8; 32], roles(&[]), None, true, Some(TrustState::Trusted)),
            Err(KeyringError::WouldLowerTrust)
        ));
        assert_eq!(kr.get("pub_ae").unwrap().state, TrustState::Revoked);
    }

    #[test]
    fn privileged_upsert_with_explicit_state_on_new_ae_id_succeeds() {
        let kr = Keyring::open_memory().unwrap();
        let record = kr
            .upsert("new_ae", [1u8; 32], roles(&[]), None, true, Some(TrustState::Trusted))
            .unwrap();
        assert_eq!(record.state, TrustState::Trusted);
    }

    #[test]
    fn unknown_ae_id_is_not_found() {
        let kr = Keyring::open_memory().unwrap();
        assert!(matches!(kr.get("ghost"), Err(KeyringError::NotFound)));
    }

    #[test]
    fn list_returns_all_records_sorted() {
        let kr = Keyring::open_memory().unwrap();
        kr.upsert("zeta", [1u8; 32], roles(&[]), None, false, None).unwrap();
        kr.upsert("alpha", [2u8; 32], roles(&[]), None, false, None).unwrap();
        let all = kr.list().unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.ae_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
