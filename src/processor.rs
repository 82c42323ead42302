//! Queue drain loop.
//!
//! Maps the content-kind tag on a queued item to a registered
//! [`ItemProcessor`] and drives dequeue → process → complete/fail. A
//! missing processor is recorded as a failure on the item itself
//! (`no_processor: ...`), never silently dropped.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::models::{ContentKind, QueueItem, QueueStatus};
use crate::queue::{FailureQueue, QueueError};

/// Per-kind retry handler invoked by the drain loop.
///
/// Implementations re-run the work that originally failed for an item of
/// their kind: re-fetch a feed entry, re-render a note, and so on.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    fn kind(&self) -> ContentKind;

    /// Re-attempt the work. A returned value is stored on the completed
    /// item as `metadata.result`.
    async fn process(&self, item: &QueueItem) -> Result<Value>;
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no_processor: no processor registered for kind '{0}'")]
    NoProcessor(ContentKind),
    #[error("no_processor: item '{0}' carries no content kind")]
    MissingKind(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// What happened to one dequeued item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub id: String,
    pub status: QueueStatus,
    pub error: Option<String>,
}

/// Totals for one [`QueueProcessor::drain`] pass.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct QueueProcessor {
    queue: FailureQueue,
    handlers: HashMap<ContentKind, Box<dyn ItemProcessor>>,
}

impl QueueProcessor {
    pub fn new(queue: FailureQueue) -> Self {
        QueueProcessor {
            queue,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for its kind. Registering a second handler for
    /// the same kind replaces the first.
    pub fn register(&mut self, processor: Box<dyn ItemProcessor>) {
        let kind = processor.kind();
        debug!(kind = kind.as_str(), "registered processor");
        self.handlers.insert(kind, processor);
    }

    pub fn registered_kinds(&self) -> Vec<ContentKind> {
        self.handlers.keys().copied().collect()
    }

    /// Dequeue and process one item. Returns `None` when no item is
    /// eligible. Handler failures and missing handlers both go through
    /// `fail_item`, consuming one attempt.
    pub async fn process_next(&self) -> Result<Option<ProcessOutcome>, ProcessError> {
        let item = match self.queue.get_next_item().await? {
            Some(item) => item,
            None => return Ok(None),
        };

        let dispatch_err = match item.kind {
            None => Some(ProcessError::MissingKind(item.id.clone())),
            Some(kind) if !self.handlers.contains_key(&kind) => {
                Some(ProcessError::NoProcessor(kind))
            }
            Some(_) => None,
        };

        if let Some(err) = dispatch_err {
            let message = err.to_string();
            error!(id = %item.id, "{}", message);
            let status = self.queue.fail_item(&item.id, &message, None).await?;
            return Ok(Some(ProcessOutcome {
                id: item.id,
                status,
                error: Some(message),
            }));
        }

        let kind = item.kind.expect("dispatch checked above");
        let handler = &self.handlers[&kind];

        match handler.process(&item).await {
            Ok(result) => {
                self.queue.complete_item(&item.id, Some(result)).await?;
                info!(id = %item.id, kind = kind.as_str(), "reprocessed queue item");
                Ok(Some(ProcessOutcome {
                    id: item.id,
                    status: QueueStatus::Completed,
                    error: None,
                }))
            }
            Err(err) => {
                let message = format!("{:#}", err);
                let status = self.queue.fail_item(&item.id, &message, None).await?;
                debug!(id = %item.id, status = %status, "reprocess attempt failed");
                Ok(Some(ProcessOutcome {
                    id: item.id,
                    status,
                    error: Some(message),
                }))
            }
        }
    }

    /// Process eligible items until the queue is drained or `max` items
    /// have been handled.
    pub async fn drain(&self, max: usize) -> Result<DrainReport, ProcessError> {
        let mut report = DrainReport::default();
        while report.processed < max {
            match self.process_next().await? {
                None => break,
                Some(outcome) => {
                    report.processed += 1;
                    if outcome.status == QueueStatus::Completed {
                        report.completed += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }
}
