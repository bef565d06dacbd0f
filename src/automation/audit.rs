use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::transport::DeviceKey;
use crate::errors::TapClawResult;

/// Something that happened during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Loop state change.
    Transition {
        from: String,
        to: String,
        attempt: u32,
    },
    Capture {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Detection {
        backend: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Tap {
        x: i32,
        y: i32,
        confidence: f32,
        label: String,
        result: String,
    },
    Key {
        key: DeviceKey,
        ok: bool,
    },
    Similarity {
        value: f64,
        threshold: f64,
    },
    Outcome {
        summary: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unix milliseconds.
    pub ts: i64,
    pub session_id: String,
    pub seq: u64,
    pub phase: String,
    pub event: AuditEvent,
}

/// Append-only record of one session. Entries are kept in memory and, when a
/// file is configured, mirrored line by line as JSONL.
pub struct AuditLog {
    session_id: String,
    entries: Vec<AuditEntry>,
    file_path: Option<PathBuf>,
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            entries: Vec::new(),
            file_path: None,
        }
    }

    /// Log that also appends to `<dir>/session_<uuid>.jsonl`.
    pub fn persistent(dir: &Path) -> Self {
        let mut log = Self::in_memory();
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "audit dir unavailable; keeping audit in memory");
            return log;
        }
        let path = dir.join(format!("session_{}.jsonl", log.session_id));
        tracing::info!(path = %path.display(), "audit log opened");
        log.file_path = Some(path);
        log
    }

    /// `<data_local_dir>/tapclaw/sessions`, falling back to the working directory.
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("tapclaw").join("sessions"))
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn record(&mut self, phase: &str, event: AuditEvent) {
        let entry = AuditEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            session_id: self.session_id.clone(),
            seq: self.entries.len() as u64,
            phase: phase.to_string(),
            event,
        };
        if let Some(path) = &self.file_path {
            if let Err(e) = append_line(path, &entry) {
                tracing::warn!(path = %path.display(), error = %e, "audit write failed");
            }
        }
        self.entries.push(entry);
    }
}

fn append_line(path: &Path, entry: &AuditEntry) -> TapClawResult<()> {
    let line = serde_json::to_string(entry)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}
