use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope code the backend uses for a successful call.
pub const SUCCESS_CODE: i64 = 200;

/// Download state of an episode as reported by the backend.
///
/// Transitions (driven by the server's download worker):
///   Pending -> Queued -> Downloading -> Completed | Failed
///   Failed -> Pending (after a retry)
///
/// Values this client does not know are kept verbatim in `Other` and treated
/// as inert: they never start polling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DownloadStatus {
    Pending,
    Queued,
    Downloading,
    Completed,
    Failed,
    Other(String),
}

impl DownloadStatus {
    /// Statuses that change without user action and therefore need polling.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Downloading)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Downloading => "DOWNLOADING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for DownloadStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PENDING" => Self::Pending,
            "QUEUED" => Self::Queued,
            "DOWNLOADING" => Self::Downloading,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl From<DownloadStatus> for String {
    fn from(status: DownloadStatus) -> Self {
        match status {
            DownloadStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One episode row from `/api/episode/list/{feedId}`.
///
/// Only `download_status` and `error_log` are ever rewritten by the client.
/// Fields the client does not model land in `extra` and serialize back out
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Server-local timestamp, `YYYY-MM-DDTHH:MM:SS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cover_url: Option<String>,
    /// ISO 8601 duration, e.g. `PT1H2M3S`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default)]
    pub download_status: Option<DownloadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub error_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_number: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Episode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel_id: None,
            title: None,
            description: None,
            published_at: None,
            default_cover_url: None,
            max_cover_url: None,
            duration: None,
            download_status: None,
            media_file_path: None,
            media_type: None,
            error_log: None,
            retry_number: None,
            created_at: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.download_status
            .as_ref()
            .is_some_and(DownloadStatus::is_active)
    }

    pub fn is_failed(&self) -> bool {
        self.download_status == Some(DownloadStatus::Failed)
    }

    /// Title for display, falling back to the id.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    /// Published date (`YYYY-MM-DD`), if the timestamp parses.
    pub fn published_date(&self) -> Option<chrono::NaiveDate> {
        let raw = self.published_at.as_deref()?;
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|dt| dt.date())
            .or_else(|_| chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
            .ok()
    }

    /// Duration rendered as `H:MM:SS` / `M:SS`.
    pub fn display_duration(&self) -> Option<String> {
        let secs = parse_iso8601_duration(self.duration.as_deref()?)?;
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        Some(if h > 0 {
            format!("{}:{:02}:{:02}", h, m, s)
        } else {
            format!("{}:{:02}", m, s)
        })
    }

    /// Overwrite the two status-bearing fields from a poll update.
    pub fn apply_status(&mut self, update: &EpisodeStatusUpdate) {
        self.download_status = update.download_status.clone();
        self.error_log = update.error_log.clone();
    }
}

/// Parse the subset of ISO 8601 durations YouTube emits (`P#DT#H#M#S`).
fn parse_iso8601_duration(raw: &str) -> Option<u64> {
    let rest = raw.strip_prefix('P')?;
    let mut total = 0u64;
    let mut num = String::new();
    let mut in_time = false;
    for c in rest.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' => num.push(c),
            unit => {
                let n: u64 = num.parse().ok()?;
                num.clear();
                let scale = match (unit, in_time) {
                    ('D', false) => 86_400,
                    ('H', true) => 3600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                total = n.checked_mul(scale).and_then(|s| total.checked_add(s))?;
            }
        }
    }
    if !num.is_empty() {
        return None;
    }
    Some(total)
}

/// Status row from `/api/episode/status`.  The backend returns whole episode
/// objects here; everything except these three fields is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeStatusUpdate {
    pub id: String,
    #[serde(default)]
    pub download_status: Option<DownloadStatus>,
    #[serde(default)]
    pub error_log: Option<String>,
}

/// One page of episodes (MyBatis-Plus `Page` serialization).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodePage {
    #[serde(default)]
    pub records: Vec<Episode>,
    /// Total number of pages for the feed at this page size.
    #[serde(default)]
    pub pages: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u32>,
}

/// `{code, msg, data}` wrapper every backend response uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: SUCCESS_CODE,
            msg: Some("ok".to_string()),
            data: Some(data),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}
