//! Observability - execution events, the in-process bus and a JSONL log.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use arbor_core::{Status, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::scheduler::SchedulerState;

/// An execution event for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub timestamp: DateTime<Utc>,
    pub execution_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    ExecutionCreated {
        tree_id: String,
    },
    ExecutionDeleted,
    TickCompleted {
        tick: u64,
        status: Status,
        tip: String,
    },
    SchedulerStateChanged {
        from: SchedulerState,
        to: SchedulerState,
    },
    BreakpointHit {
        node_id: String,
        hit_count: u64,
    },
    WatchTriggered {
        key: String,
        condition: String,
        value: Option<Value>,
        hit_count: u64,
    },
    StepCompleted {
        mode: String,
    },
    Paused {
        reason: String,
    },
    Resumed,
    ExecutionError {
        message: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ExecutionCreated { .. } => "execution_created",
            EventKind::ExecutionDeleted => "execution_deleted",
            EventKind::TickCompleted { .. } => "tick_completed",
            EventKind::SchedulerStateChanged { .. } => "scheduler_state_changed",
            EventKind::BreakpointHit { .. } => "breakpoint_hit",
            EventKind::WatchTriggered { .. } => "watch_triggered",
            EventKind::StepCompleted { .. } => "step_completed",
            EventKind::Paused { .. } => "paused",
            EventKind::Resumed => "resumed",
            EventKind::ExecutionError { .. } => "execution_error",
        }
    }
}

/// Bounded fan-out of execution events.
///
/// Publishing never blocks. Receivers that fall more than `capacity` events behind skip the
/// oldest ones and see `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, execution_id: &str, kind: EventKind) {
        tracing::trace!(execution_id, event = kind.name(), "publishing event");
        // No subscribers is not an error.
        let _ = self.sender.send(ExecutionEvent {
            timestamp: Utc::now(),
            execution_id: execution_id.to_string(),
            kind,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Append-only JSONL event log.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log at `.arbor/events.jsonl` under the project root.
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(".arbor/events.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &ExecutionEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;

        Ok(())
    }

    /// Read the last `limit` events. Unreadable lines are skipped.
    pub fn read_recent(&self, limit: usize) -> Vec<ExecutionEvent> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let reader = BufReader::new(file);
        let mut events: Vec<ExecutionEvent> = reader
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();

        if events.len() > limit {
            events.drain(0..events.len() - limit);
        }

        events
    }

    /// Copy events from `receiver` into the log until the bus closes.
    pub async fn record(&self, mut receiver: broadcast::Receiver<ExecutionEvent>) -> Result<()> {
        loop {
            match receiver.recv().await {
                Ok(event) => self.append(&event)?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, path = %self.path.display(), "event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish("exec-1", EventKind::Resumed);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscribers_lag_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for tick in 1..=5 {
            bus.publish(
                "exec-1",
                EventKind::TickCompleted {
                    tick,
                    status: Status::Running,
                    tip: "leaf".into(),
                },
            );
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        let next = rx.recv().await.unwrap();
        assert!(matches!(next.kind, EventKind::TickCompleted { tick: 4, .. }));
    }

    #[test]
    fn events_serialize_with_a_flat_type_tag() {
        let event = ExecutionEvent {
            timestamp: Utc::now(),
            execution_id: "exec-1".into(),
            kind: EventKind::BreakpointHit {
                node_id: "approach".into(),
                hit_count: 2,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "breakpoint_hit");
        assert_eq!(json["node_id"], "approach");
        assert_eq!(json["execution_id"], "exec-1");
    }

    #[test]
    fn log_keeps_the_most_recent_events() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::for_project(dir.path());
        assert!(log.read_recent(10).is_empty());

        for tick in 1..=4 {
            let event = ExecutionEvent {
                timestamp: Utc::now(),
                execution_id: "exec-1".into(),
                kind: EventKind::TickCompleted {
                    tick,
                    status: Status::Running,
                    tip: "leaf".into(),
                },
            };
            log.append(&event).unwrap();
        }

        let recent = log.read_recent(2);
        assert_eq!(recent.len(), 2);
        assert!(matches!(recent[0].kind, EventKind::TickCompleted { tick: 3, .. }));
        assert!(log.path().ends_with(".arbor/events.jsonl"));
    }
}
