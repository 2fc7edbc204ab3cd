//! Session log: when the control plane was running.
//!
//! A JSON list of `{startedAt, endedAt?}` entries. At most one session is
//! open at a time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::{Clock, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

pub struct SessionLog {
    path: PathBuf,
    sessions: Vec<Session>,
    clock: Arc<dyn Clock>,
}

impl SessionLog {
    /// Load from `path`. A missing or corrupt file is an empty log.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let path = path.into();
        let sessions = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %path.display(), "corrupt session log, starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            path,
            sessions,
            clock,
        }
    }

    /// Open a new session unless one is already open.
    pub fn start_session(&mut self) -> io::Result<()> {
        if self.has_active_session() {
            return Ok(());
        }
        self.sessions.push(Session {
            started_at: self.clock.now(),
            ended_at: None,
        });
        self.save()
    }

    /// Close the open session, if any.
    pub fn end_session(&mut self) -> io::Result<()> {
        let now = self.clock.now();
        match self.sessions.iter_mut().find(|s| s.is_active()) {
            Some(session) => {
                session.ended_at = Some(now);
                self.save()
            }
            None => Ok(()),
        }
    }

    pub fn has_active_session(&self) -> bool {
        self.sessions.iter().any(Session::is_active)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.sessions).map_err(io::Error::other)?;
        fs::write(&self.path, json)
    }
}
