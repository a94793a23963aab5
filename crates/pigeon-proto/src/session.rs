//! Read-only login session shared with the API client.
//!
//! The web front-end keeps the logged-in user in browser storage; here the
//! same record lives in `<data_dir>/session.json`.  This crate only ever
//! reads it.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::platform;

const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

/// Cheap to clone; every clone sees the same record.
#[derive(Debug, Clone, Default)]
pub struct Session {
    record: Arc<SessionRecord>,
}

impl Session {
    pub fn new(token: Option<String>, language: Option<String>) -> Self {
        Self {
            record: Arc::new(SessionRecord {
                token,
                username: None,
                language,
            }),
        }
    }

    /// Load the stored session.  A missing file is an anonymous session.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::session_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let record: SessionRecord = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self {
            record: Arc::new(record),
        })
    }

    /// Same session with the token replaced (CLI override).
    pub fn with_token(&self, token: String) -> Self {
        let mut record = (*self.record).clone();
        record.token = Some(token);
        Self {
            record: Arc::new(record),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.record.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn username(&self) -> Option<&str> {
        self.record.username.as_deref()
    }

    pub fn language(&self) -> &str {
        self.record.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }

    pub fn session_path() -> PathBuf {
        platform::data_dir().join("session.json")
    }
}
