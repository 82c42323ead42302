//! Core data models used throughout Intake.
//!
//! These types represent candidate items arriving from source connectors,
//! the identity and validation records computed for them, and the queue
//! rows that track failed work awaiting retry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of content kinds the pipeline understands.
///
/// Dispatch (validation thresholds, queue processors) keys off this enum;
/// an unrecognized kind string is a typed error at the edge, never a silent
/// fall-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Article,
    Newsletter,
    Podcast,
    Video,
    Email,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Article => "article",
            ContentKind::Newsletter => "newsletter",
            ContentKind::Podcast => "podcast",
            ContentKind::Video => "video",
            ContentKind::Email => "email",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "article" => Ok(ContentKind::Article),
            "newsletter" => Ok(ContentKind::Newsletter),
            "podcast" => Ok(ContentKind::Podcast),
            "video" => Ok(ContentKind::Video),
            "email" => Ok(ContentKind::Email),
            other => anyhow::bail!(
                "Unknown content kind: '{}'. Available: article, newsletter, podcast, video, email",
                other
            ),
        }
    }
}

/// Raw candidate item produced by a source connector before identity
/// assignment and validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: String,
    pub kind: ContentKind,
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub url: Option<String>,
    pub guid: Option<String>,
    /// Publication date, ISO-8601.
    pub date: String,
    /// Pipeline arrival time, ISO-8601.
    pub ingested_at: String,
    pub content_hash: Option<String>,
    pub transcript: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Deduplication identity derived from a candidate item.
///
/// Never persisted on its own; attached to the item before storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentIdentifier {
    /// SHA-256 over normalized title + leading body text, 64 hex chars.
    pub content_hash: String,
    pub url: Option<String>,
    pub url_hash: Option<String>,
    pub guid: Option<String>,
    pub guid_hash: Option<String>,
    /// Preferred identity: guid, else normalized-URL hash, else title slug.
    pub canonical_id: String,
}

/// Outcome of validating a candidate item. Ephemeral, computed per item.
///
/// `is_valid` is true iff `errors` is empty; warnings never block acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Queue item priority. Stored as an INTEGER so `ORDER BY priority DESC`
/// needs no mapping in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_i64(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    pub fn from_i64(v: i64) -> Priority {
        match v {
            0 => Priority::Low,
            2 => Priority::High,
            3 => Priority::Critical,
            _ => Priority::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// Lifecycle state of a failure-queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> QueueStatus {
        match s {
            "processing" => QueueStatus::Processing,
            "completed" => QueueStatus::Completed,
            "failed" => QueueStatus::Failed,
            "cancelled" => QueueStatus::Cancelled,
            _ => QueueStatus::Pending,
        }
    }

    /// Terminal rows are eligible for time-based cleanup and nothing else.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure-queue row. Timestamps are Unix epoch seconds, matching the
/// SQLite schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    /// Content-kind tag used for processor dispatch. Absent when the caller
    /// enqueued work that is not tied to a single content kind.
    pub kind: Option<ContentKind>,
    /// Opaque payload, round-tripped as JSON.
    pub data: serde_json::Value,
    /// Last failure description.
    pub error: String,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub priority: Priority,
    pub status: QueueStatus,
    pub created_at: i64,
    pub updated_at: i64,
    /// Earliest epoch second at which the item may be dequeued again.
    pub next_retry_at: Option<i64>,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_kind_round_trip() {
        for kind in [
            ContentKind::Article,
            ContentKind::Newsletter,
            ContentKind::Podcast,
            ContentKind::Video,
            ContentKind::Email,
        ] {
            assert_eq!(kind.as_str().parse::<ContentKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_error() {
        assert!("tweet".parse::<ContentKind>().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::from_i64(Priority::Critical.as_i64()), Priority::Critical);
    }

    #[test]
    fn test_terminal_states() {
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
        assert!(!QueueStatus::Cancelled.is_terminal());
    }
}
