//! Error classification and automated recovery.
//!
//! [`ErrorAnalyzer`] turns a failure into a structured [`ErrorReport`]:
//! category and severity by keyword match, category-specific suggested
//! actions, and a resource snapshot for the operator. [`RecoveryManager`]
//! then tries the registered strategies for that category in registration
//! order, stopping at the first success. Both keep bounded in-process
//! history — explicit ring buffers owned by the caller, not globals, so
//! lifecycle and test isolation stay obvious.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use sysinfo::{Disks, System};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Oldest reports are evicted past this cap.
const ERROR_HISTORY_CAP: usize = 500;
/// Oldest recovery attempts are evicted past this cap.
const RECOVERY_HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Storage,
    Validation,
    Processing,
    Configuration,
    System,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Processing => "processing",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::System => "system",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Point-in-time resource usage attached to every report.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub disk_available_gb: f64,
    pub disk_total_gb: f64,
}

impl SystemSnapshot {
    pub fn capture() -> SystemSnapshot {
        let mut sys = System::new_all();
        sys.refresh_all();

        let disks = Disks::new_with_refreshed_list();
        let (mut available, mut total) = (0u64, 0u64);
        for disk in disks.list() {
            available += disk.available_space();
            total += disk.total_space();
        }

        SystemSnapshot {
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            memory_used_mb: sys.used_memory() / (1024 * 1024),
            memory_total_mb: sys.total_memory() / (1024 * 1024),
            disk_available_gb: available as f64 / 1e9,
            disk_total_gb: total as f64 / 1e9,
        }
    }
}

/// Structured record of one analyzed failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,
    /// Root-cause description, distinct from the full chain in `message`.
    pub error_type: String,
    pub message: String,
    /// Error chain, outermost first, one entry per cause.
    pub trace: Vec<String>,
    pub context: serde_json::Value,
    pub system: SystemSnapshot,
    pub suggested_actions: Vec<String>,
    pub recovery_attempts: u32,
    pub resolved: bool,
}

/// Keyword table, most-specific categories first so that e.g.
/// "connection" wins over the generic processing fallback.
const CATEGORY_KEYWORDS: [(ErrorCategory, &[&str]); 6] = [
    (
        ErrorCategory::Network,
        &[
            "connection", "timeout", "timed out", "dns", "socket", "unreachable", "refused",
            "reset by peer", "tls", "ssl", "http",
        ],
    ),
    (
        ErrorCategory::Storage,
        &[
            "disk", "permission denied", "no such file", "read-only", "no space", "i/o error",
            "database", "sqlite", "directory", "file exists", "write",
        ],
    ),
    (
        ErrorCategory::System,
        &["out of memory", "memory", "resource", "process", "signal", "killed"],
    ),
    (
        ErrorCategory::Configuration,
        &["config", "setting", "environment variable", "missing key", "unknown option"],
    ),
    (
        ErrorCategory::Validation,
        &["validation", "invalid", "missing field", "malformed", "schema", "parse error"],
    ),
    (
        ErrorCategory::Processing,
        &["process", "parse", "encode", "decode", "transform", "render"],
    ),
];

const CRITICAL_KEYWORDS: [&str; 5] = ["fatal", "corrupt", "out of memory", "panic", "data loss"];

/// Classify an error message into exactly one category.
pub fn categorize(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return category;
        }
    }
    ErrorCategory::Unknown
}

/// Severity: critical keywords trump everything, otherwise mapped from
/// the category.
pub fn severity_for(category: ErrorCategory, message: &str) -> ErrorSeverity {
    let lower = message.to_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return ErrorSeverity::Critical;
    }
    match category {
        ErrorCategory::Storage | ErrorCategory::System => ErrorSeverity::High,
        ErrorCategory::Processing | ErrorCategory::Network | ErrorCategory::Unknown => {
            ErrorSeverity::Medium
        }
        ErrorCategory::Validation | ErrorCategory::Configuration => ErrorSeverity::Low,
    }
}

fn suggested_actions(category: ErrorCategory) -> Vec<String> {
    let actions: &[&str] = match category {
        ErrorCategory::Network => &[
            "check connectivity to the source host",
            "verify DNS resolution",
            "retry after the backoff window",
        ],
        ErrorCategory::Storage => &[
            "check free disk space",
            "verify directory permissions",
            "inspect the collision registry for stale entries",
        ],
        ErrorCategory::Validation => &[
            "inspect the rejected item's error list",
            "review source connector output format",
        ],
        ErrorCategory::Processing => &[
            "re-run the item through the failure queue",
            "check for malformed input upstream",
        ],
        ErrorCategory::Configuration => &[
            "validate the config file against the example",
            "check environment overrides",
        ],
        ErrorCategory::System => &[
            "check memory and CPU pressure",
            "inspect recent process restarts",
        ],
        ErrorCategory::Unknown => &["inspect the full error chain in the log"],
    };
    actions.iter().map(|s| s.to_string()).collect()
}

/// Classifies failures and keeps a bounded report history.
pub struct ErrorAnalyzer {
    history: VecDeque<ErrorReport>,
}

impl Default for ErrorAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorAnalyzer {
    pub fn new() -> Self {
        ErrorAnalyzer {
            history: VecDeque::with_capacity(ERROR_HISTORY_CAP),
        }
    }

    /// Analyze a failure into a report and append it to the history.
    pub fn analyze(&mut self, error: &anyhow::Error, context: serde_json::Value) -> ErrorReport {
        let message = format!("{:#}", error);
        let error_type = error.root_cause().to_string();
        let trace: Vec<String> = error.chain().map(|cause| cause.to_string()).collect();
        let category = categorize(&message);
        let severity = severity_for(category, &message);

        let report = ErrorReport {
            error_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity,
            category,
            error_type,
            message,
            trace,
            context,
            system: SystemSnapshot::capture(),
            suggested_actions: suggested_actions(category),
            recovery_attempts: 0,
            resolved: false,
        };

        debug!(
            category = category.as_str(),
            severity = ?severity,
            "analyzed error"
        );

        if self.history.len() == ERROR_HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(report.clone());
        report
    }

    pub fn history(&self) -> impl Iterator<Item = &ErrorReport> {
        self.history.iter()
    }

    /// Counts by category over the retained history.
    pub fn category_counts(&self) -> HashMap<ErrorCategory, usize> {
        let mut counts = HashMap::new();
        for report in &self.history {
            *counts.entry(report.category).or_default() += 1;
        }
        counts
    }
}

/// A pluggable recovery action for one error category.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, report: &ErrorReport) -> Result<()>;
}

/// One recorded strategy invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub strategy: String,
    pub category: ErrorCategory,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Outcome of [`RecoveryManager::attempt_recovery`].
#[derive(Debug)]
pub struct RecoveryOutcome {
    pub report: ErrorReport,
    pub recovered: bool,
    pub attempts_made: u32,
}

/// Success-rate statistics for one category over the last 24 hours.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryRecoveryStats {
    pub attempts: usize,
    pub successes: usize,
    pub success_rate: f64,
}

pub struct RecoveryManager {
    analyzer: ErrorAnalyzer,
    strategies: HashMap<ErrorCategory, Vec<Box<dyn RecoveryStrategy>>>,
    attempts: VecDeque<RecoveryAttempt>,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryManager {
    pub fn new() -> Self {
        RecoveryManager {
            analyzer: ErrorAnalyzer::new(),
            strategies: HashMap::new(),
            attempts: VecDeque::with_capacity(RECOVERY_HISTORY_CAP),
        }
    }

    /// Strategies run in registration order when their category matches.
    pub fn register_strategy(&mut self, category: ErrorCategory, strategy: Box<dyn RecoveryStrategy>) {
        self.strategies.entry(category).or_default().push(strategy);
    }

    /// Analyze the error, then try each registered strategy for its
    /// category until one succeeds. Every invocation is recorded.
    pub async fn attempt_recovery(
        &mut self,
        error: &anyhow::Error,
        context: serde_json::Value,
    ) -> RecoveryOutcome {
        let mut report = self.analyzer.analyze(error, context);
        let mut recovered = false;
        let mut attempts_made = 0u32;

        let strategies = self.strategies.get(&report.category);
        if let Some(strategies) = strategies {
            for strategy in strategies {
                let started_at = Utc::now();
                let start = std::time::Instant::now();
                let result = strategy.attempt(&report).await;
                let duration_ms = start.elapsed().as_millis() as u64;
                attempts_made += 1;

                let attempt = RecoveryAttempt {
                    strategy: strategy.name().to_string(),
                    category: report.category,
                    started_at,
                    duration_ms,
                    success: result.is_ok(),
                    error: result.as_ref().err().map(|e| format!("{:#}", e)),
                };
                if self.attempts.len() == RECOVERY_HISTORY_CAP {
                    self.attempts.pop_front();
                }
                self.attempts.push_back(attempt);

                match result {
                    Ok(()) => {
                        info!(
                            strategy = strategy.name(),
                            category = report.category.as_str(),
                            "recovery succeeded"
                        );
                        recovered = true;
                        break;
                    }
                    Err(err) => {
                        debug!(
                            strategy = strategy.name(),
                            error = %err,
                            "recovery strategy failed"
                        );
                    }
                }
            }
        } else {
            warn!(
                category = report.category.as_str(),
                "no recovery strategies registered"
            );
        }

        report.recovery_attempts = attempts_made;
        report.resolved = recovered;

        RecoveryOutcome {
            report,
            recovered,
            attempts_made,
        }
    }

    pub fn analyzer(&self) -> &ErrorAnalyzer {
        &self.analyzer
    }

    /// Per-category success rates over the trailing 24 hours.
    pub fn recovery_stats(&self) -> HashMap<ErrorCategory, CategoryRecoveryStats> {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let mut stats: HashMap<ErrorCategory, CategoryRecoveryStats> = HashMap::new();

        for attempt in self.attempts.iter().filter(|a| a.started_at >= cutoff) {
            let entry = stats.entry(attempt.category).or_insert(CategoryRecoveryStats {
                attempts: 0,
                successes: 0,
                success_rate: 0.0,
            });
            entry.attempts += 1;
            if attempt.success {
                entry.successes += 1;
            }
        }

        for entry in stats.values_mut() {
            entry.success_rate = entry.successes as f64 / entry.attempts as f64;
        }
        stats
    }
}
