//! Append-only audit log (C2).
//!
//! Every state-changing API call writes exactly one structured record here
//! before its HTTP response is returned. Records are written one JSON
//! object per line, with keys in a fixed, alphabetical order so that two
//! otherwise-identical records diff cleanly (`action` before `actor`
//! before `decision`, etc. — see [`AuditRecord`]'s field order, which serde
//! preserves for struct serialization).
//!
//! The same record is also emitted via `tracing::info!` with the JSON blob
//! in an `audit` field, so operational log aggregators can query it without
//! tailing the file directly — the file remains the durable, non-repudiable
//! system of record.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AdmissionRegister,
    AdmissionVerify,
    AdmissionReplay,
    KeyringUpsert,
    KeyringRevoke,
    PolicyReloadFailed,
    CapabilitiesDeclared,
    EmitAccepted,
    EmitDenied,
    SubscribeAdmitted,
    SubscribeDenied,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub actor: String,
    pub decision: &'static str,
    pub instant: DateTime<Utc>,
    pub reason: Option<String>,
    pub subject: Option<String>,
}

impl AuditRecord {
    pub fn new(actor: impl Into<String>, action: AuditAction, decision: &'static str) -> Self {
        AuditRecord {
            action,
            actor: actor.into(),
            decision,
            instant: Utc::now(),
            reason: None,
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

pub struct AuditLog {
    file: Mutex<File>,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to open audit log {:?}: {e}", path.as_ref()))?;
        Ok(AuditLog {
            file: Mutex::new(file),
        })
    }

    /// Write one audit record, flushing before returning.
    ///
    /// A write failure degrades to an error the caller must treat as
    /// `Internal` and must refuse the underlying state change (§7: "Audit
    /// write failures degrade to Internal and refuse the state change.").
    pub fn append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        tracing::info!(audit = %line, "gateway audit");

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(&path).unwrap();

        log.append(&AuditRecord::new("pub_ae", AuditAction::AdmissionVerify, "Accepted"))
            .unwrap();
        log.append(
            &AuditRecord::new("pub_ae", AuditAction::EmitDenied, "Denied")
                .with_subject("fused.track")
                .with_reason("UnknownSubject"),
        )
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["actor"], "pub_ae");
        assert_eq!(first["decision"], "Accepted");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["subject"], "fused.track");
        assert_eq!(second["reason"], "UnknownSubject");
    }
}
