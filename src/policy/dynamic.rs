//! Dynamic Capability Store (C7).
//!
//! SQLite-backed, one row per ae_id (§6 capabilities table). Writes are
//! authenticated upstream by the caller (the route handler checks the
//! session subject matches the declaring ae_id); this store itself performs
//! no authorization, only persistence.

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashMap;

use super::types::DynamicCapability;

pub struct DynamicCapabilityStore {
    conn: Mutex<Connection>,
}

impl DynamicCapabilityStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrate(&conn)?;
        Ok(DynamicCapabilityStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(DynamicCapabilityStore {
            conn: Mutex::new(conn),
        })
    }

    /// Replace the declaration for `ae_id` wholesale — the latest write
    /// supersedes any prior one (§3: "Latest declaration supersedes
    /// prior").
    pub fn put(&self, ae_id: &str, capability: &DynamicCapability) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO capabilities (ae_id, publishes, subscribes, meta, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(ae_id) DO UPDATE SET
                publishes = excluded.publishes,
                subscribes = excluded.subscribes,
                meta = excluded.meta,
                updated_at = excluded.updated_at",
            params![
                ae_id,
                serde_json::to_string(&capability.publishes)?,
                serde_json::to_string(&capability.subscribes)?,
                serde_json::to_string(&capability.meta)?,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, ae_id: &str) -> anyhow::Result<Option<DynamicCapability>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT publishes, subscribes, meta FROM capabilities WHERE ae_id = ?1",
            params![ae_id],
            |row| {
                let publishes: String = row.get(0)?;
                let subscribes: String = row.get(1)?;
                let meta: String = row.get(2)?;
                Ok((publishes, subscribes, meta))
            },
        );
        match result {
            Ok((publishes, subscribes, meta)) => Ok(Some(DynamicCapability {
                publishes: serde_json::from_str(&publishes)?,
                subscribes: serde_json::from_str(&subscribes)?,
                meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot every declaration, keyed by ae_id — used to rebuild the
    /// effective-policy snapshot (§4.8).
    pub fn list(&self) -> anyhow::Result<HashMap<String, DynamicCapability>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT ae_id, publishes, subscribes, meta FROM capabilities")?;
        let rows = stmt.query_map([], |row| {
            let ae_id: String = row.get(0)?;
            let publishes: String = row.get(1)?;
            let subscribes: String = row.get(2)?;
            let meta: String = row.get(3)?;
            Ok((ae_id, publishes, subscribes, meta))
        })?;

        let mut out = HashMap::new();
        for row in rows {
            let (ae_id, publishes, subscribes, meta) = row?;
            out.insert(
                ae_id,
                DynamicCapability {
                    publishes: serde_json::from_str(&publishes)?,
                    subscribes: serde_json::from_str(&subscribes)?,
                    meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
                },
            );
        }
        Ok(out)
    }

    /// Remove a declaration entirely — used by the AE revocation cascade
    /// (§3 lifecycle: "destroyed by AE revocation cascade").
    pub fn remove(&self, ae_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM capabilities WHERE ae_id = ?1", params![ae_id])?;
        Ok(())
    }
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS capabilities (
            ae_id TEXT PRIMARY KEY,
            publishes TEXT NOT NULL,
            subscribes TEXT NOT NULL,
            meta TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn cap(publishes: &[&str]) -> DynamicCapability {
        DynamicCapability {
            publishes: publishes.iter().map(|s| s.to_string()).collect(),
            subscribes: HashSet::new(),
            meta: serde_json::Value::Null,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = DynamicCapabilityStore::open_memory().unwrap();
        store.put("pub_ae", &cap(&["fusion.topic"])).unwrap();
        let got = store.get("pub_ae").unwrap().unwrap();
        assert!(got.publishes.contains("fusion.topic"));
    }

    #[test]
    fn second_put_replaces_rather_than_merges() {
        let store = DynamicCapabilityStore::open_memory().unwrap();
        store.put("pub_ae", &cap(&["a.topic"])).unwrap();
        store.put("pub_ae", &cap(&["b.topic"])).unwrap();
        let got = store.get("pub_ae").unwrap().unwrap();
        assert!(!got.publishes.contains("a.topic"));
        assert!(got.publishes.contains("b.topic"));
    }

    #[test]
    fn unknown_ae_id_returns_none() {
        let store = DynamicCapabilityStore::open_memory().unwrap();
        assert!(store.get("ghost").unwrap().is_none());
    }

    #[test]
    fn remove_clears_declaration() {
        let store = DynamicCapabilityStore::open_memory().unwrap();
        store.put("pub_ae", &cap(&["a.topic"])).unwrap();
        store.remove("pub_ae").unwrap();
        assert!(store.get("pub_ae").unwrap().is_none());
    }

    #[test]
    fn list_returns_all_declarations() {
        let store = DynamicCapabilityStore::open_memory().unwrap();
        store.put("pub_ae", &cap(&["a.topic"])).unwrap();
        store.put("sub_ae", &cap(&["b.topic"])).unwrap();
        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
    }
}
