//! Audit log with coalescing of high-frequency supply additions.
//!
//! Supply additions are buffered per `(actor, tunnel, calendar day)` and
//! emitted as one summary line on the next flush. Every other action is
//! emitted immediately. Sink failures are logged and swallowed; the ledger
//! mutation that produced the event has already succeeded.

use crate::error::AuditError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use logi_types::{ActionKind, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One formatted line handed to the logging surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLine {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// A ledger action worth logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor: UserId,
    pub action: ActionKind,
    pub target: String,
    pub amount: Option<u64>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(actor: UserId, action: ActionKind, target: impl Into<String>) -> Self {
        Self {
            actor,
            action,
            target: target.into(),
            amount: None,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// Line emitted for actions that are not coalesced
    fn immediate_text(&self) -> String {
        let actor = &self.actor;
        let target = &self.target;
        let mut text = match self.action {
            ActionKind::AddSupplies => format!("{actor} added supplies to {target}"),
            ActionKind::FacilityCreated => format!("{actor} created facility {target}"),
            ActionKind::TunnelAdded => format!("{actor} added tunnel {target}"),
            ActionKind::TunnelUpdated => format!("{actor} updated tunnel {target}"),
            ActionKind::TunnelDeleted => format!("{actor} deleted tunnel {target}"),
            ActionKind::OrderCreated => format!("{actor} placed order #{target}"),
            ActionKind::OrderClaimed => format!("{actor} claimed order #{target}"),
            ActionKind::OrderStatusChanged => format!("{actor} updated order #{target}"),
            ActionKind::OrderDeleted => format!("{actor} deleted order #{target}"),
            ActionKind::LeaderboardReset => format!("{actor} closed the leaderboard period"),
            ActionKind::WarArchived => format!("{actor} archived the war as {target}"),
        };
        if let Some(detail) = &self.detail {
            text.push_str(": ");
            text.push_str(detail);
        }
        if let Some(amount) = self.amount {
            text.push_str(&format!(" ({amount})"));
        }
        text
    }
}

/// Destination for audit lines
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Deliver one line
    async fn write(&self, line: &AuditLine) -> Result<(), AuditError>;
}

/// Sink that mirrors audit lines into tracing output
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, line: &AuditLine) -> Result<(), AuditError> {
        info!(target: "logi::audit", at = %line.at, "{}", line.text);
        Ok(())
    }
}

/// In-memory sink for testing
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    lines: Mutex<Vec<AuditLine>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of every line written so far
    pub fn texts(&self) -> Vec<String> {
        self.lines.lock().iter().map(|l| l.text.clone()).collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, line: &AuditLine) -> Result<(), AuditError> {
        self.lines.lock().push(line.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CoalesceKey {
    actor: UserId,
    target: String,
    day: NaiveDate,
}

/// Buffering front of an [`AuditSink`]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    pending: Mutex<BTreeMap<CoalesceKey, u64>>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record an event: buffer it if it is a supply addition, otherwise
    /// emit it right away
    pub async fn record(&self, event: AuditEvent) {
        if event.action.is_supply_addition() {
            let key = CoalesceKey {
                actor: event.actor,
                target: event.target,
                day: event.at.date_naive(),
            };
            let amount = event.amount.unwrap_or(0);
            let mut pending = self.pending.lock();
            let total = pending.entry(key).or_insert(0);
            *total = total.saturating_add(amount);
            return;
        }

        let line = AuditLine {
            at: event.at,
            text: event.immediate_text(),
        };
        self.emit(&line).await;
    }

    /// Emit one line per buffered key and clear the buffer.
    ///
    /// The buffer is swapped out under the lock before any I/O, so records
    /// arriving during the flush land in the next batch and no key is
    /// emitted twice. Returns the number of lines emitted.
    pub async fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return 0;
        }

        let now = Utc::now();
        let count = batch.len();
        for (key, total) in batch {
            let line = AuditLine {
                at: now,
                text: format!(
                    "{} added supplies to {} ({} today)",
                    key.actor, key.target, total
                ),
            };
            self.emit(&line).await;
        }

        debug!(lines = count, "Audit buffer flushed");
        count
    }

    /// Number of buffered keys awaiting the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    async fn emit(&self, line: &AuditLine) {
        if let Err(e) = self.sink.write(line).await {
            warn!(error = %e, line = %line.text, "Audit sink write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn supply(actor: &str, tunnel: &str, amount: u64, at: DateTime<Utc>) -> AuditEvent {
        AuditEvent::new(UserId::new(actor), ActionKind::AddSupplies, tunnel)
            .with_amount(amount)
            .at(at)
    }

    #[tokio::test]
    async fn test_same_key_coalesces_into_one_line() {
        let sink = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new(sink.clone());

        for (hour, amount) in [(1, 100), (2, 250), (9, 650)] {
            log.record(supply("alice", "T1", amount, day(hour))).await;
        }
        assert!(sink.texts().is_empty());
        assert_eq!(log.pending_len(), 1);

        assert_eq!(log.flush().await, 1);
        assert_eq!(
            sink.texts(),
            vec!["alice added supplies to T1 (1000 today)".to_string()]
        );
        assert_eq!(log.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_get_separate_lines() {
        let sink = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new(sink.clone());

        log.record(supply("alice", "T1", 10, day(1))).await;
        log.record(supply("alice", "T2", 20, day(1))).await;
        log.record(supply("bob", "T1", 30, day(1))).await;
        log.record(supply("alice", "T1", 40, day(1) + Duration::days(1)))
            .await;

        assert_eq!(log.flush().await, 4);
        let texts = sink.texts();
        assert!(texts.contains(&"alice added supplies to T1 (10 today)".to_string()));
        assert!(texts.contains(&"alice added supplies to T1 (40 today)".to_string()));
        assert!(texts.contains(&"alice added supplies to T2 (20 today)".to_string()));
        assert!(texts.contains(&"bob added supplies to T1 (30 today)".to_string()));
    }

    #[tokio::test]
    async fn test_other_actions_are_immediate() {
        let sink = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new(sink.clone());

        log.record(AuditEvent::new(
            UserId::new("officer"),
            ActionKind::TunnelDeleted,
            "T1",
        ))
        .await;
        log.record(
            AuditEvent::new(UserId::new("bob"), ActionKind::OrderStatusChanged, "3")
                .with_detail("In Progress"),
        )
        .await;

        assert_eq!(
            sink.texts(),
            vec![
                "officer deleted tunnel T1".to_string(),
                "bob updated order #3: In Progress".to_string(),
            ]
        );
        assert_eq!(log.flush().await, 0);
    }

    #[tokio::test]
    async fn test_second_flush_does_not_repeat_lines() {
        let sink = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new(sink.clone());

        log.record(supply("alice", "T1", 5, day(1))).await;
        log.flush().await;
        log.flush().await;
        assert_eq!(sink.texts().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_and_flushes_lose_nothing() {
        let sink = Arc::new(MemoryAuditSink::new());
        let log = Arc::new(AuditLog::new(sink.clone()));

        let mut writers = Vec::new();
        for _ in 0..8 {
            let log = log.clone();
            writers.push(tokio::spawn(async move {
                for _ in 0..100 {
                    log.record(supply("alice", "T1", 1, day(3))).await;
                }
            }));
        }
        let flusher = {
            let log = log.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    log.flush().await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for writer in writers {
            writer.await.unwrap();
        }
        flusher.await.unwrap();
        log.flush().await;

        let total: u64 = sink
            .texts()
            .iter()
            .map(|text| {
                let start = text.find('(').unwrap() + 1;
                let end = text.find(" today").unwrap();
                text[start..end].parse::<u64>().unwrap()
            })
            .sum();
        assert_eq!(total, 800);
    }
}
