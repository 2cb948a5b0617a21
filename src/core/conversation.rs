//! Conversation tracing for agentmesh.
//!
//! Handles:
//! - Recording every handoff between two agents
//! - Detecting ping-pong handoffs (sequential mode)
//! - Detecting handoffs that overlap an unresolved exchange (concurrent mode)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchedulingMode;

/// Default number of recent records inspected for a reverse handoff.
pub const DEFAULT_RECENT_WINDOW: usize = 3;

/// Lifecycle of a handoff record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Nested invocation still running.
    Open,
    /// Nested invocation returned normally.
    Completed,
    /// Another handoff took over before this one returned.
    Interrupted,
}

/// One handoff between two agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub sender: String,
    pub receiver: String,
    /// Id of the tool call that started the handoff.
    pub call_id: String,
    pub status: RecordStatus,
    pub opened_at: DateTime<Utc>,
}

impl ConversationRecord {
    fn new(sender: &str, receiver: &str, call_id: &str) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            call_id: call_id.to_string(),
            status: RecordStatus::Open,
            opened_at: Utc::now(),
        }
    }

    fn is_between(&self, sender: &str, receiver: &str) -> bool {
        self.sender == sender && self.receiver == receiver
    }
}

/// Handle to one record in a tracer's history.
///
/// Call ids come from the completion service and may repeat, so records are
/// resolved through this handle rather than by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(usize);

/// What the gateway should do with a requested handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Run the receiver; `record` was opened.
    Fresh { record: RecordId },
    /// The receiver recently handed off to the sender. Do not recurse.
    Rejected { counterpart: String },
    /// The receiver was waiting on its own handoff. That record is now
    /// interrupted; the gateway must answer its call id, then run the
    /// receiver. `record` was opened for the new pair.
    Preempted {
        interrupted: ConversationRecord,
        record: RecordId,
    },
}

impl Admission {
    /// The record opened by this admission, if any.
    pub fn record(&self) -> Option<RecordId> {
        match self {
            Admission::Fresh { record } | Admission::Preempted { record, .. } => Some(*record),
            Admission::Rejected { .. } => None,
        }
    }
}

/// Ordered history of handoffs for one gateway.
#[derive(Debug, Clone)]
pub struct ConversationTracer {
    mode: SchedulingMode,
    window: usize,
    history: Vec<ConversationRecord>,
}

impl ConversationTracer {
    pub fn new(mode: SchedulingMode) -> Self {
        Self::with_window(mode, DEFAULT_RECENT_WINDOW)
    }

    pub fn with_window(mode: SchedulingMode, window: usize) -> Self {
        Self {
            mode,
            window,
            history: Vec::new(),
        }
    }

    /// Decide whether `sender -> receiver` may start, recording it if so.
    pub fn admit(&mut self, sender: &str, receiver: &str, call_id: &str) -> Admission {
        match self.mode {
            SchedulingMode::Sequential => self.admit_sequential(sender, receiver, call_id),
            SchedulingMode::Concurrent => self.admit_concurrent(sender, receiver, call_id),
        }
    }

    fn admit_sequential(&mut self, sender: &str, receiver: &str, call_id: &str) -> Admission {
        let recent_start = self.history.len().saturating_sub(self.window);
        let reversed = self.history[recent_start..]
            .iter()
            .any(|r| r.is_between(receiver, sender));
        if reversed {
            tracing::debug!(%sender, %receiver, "reverse handoff inside recent window");
            return Admission::Rejected {
                counterpart: receiver.to_string(),
            };
        }

        Admission::Fresh {
            record: self.open_record(sender, receiver, call_id),
        }
    }

    fn admit_concurrent(&mut self, sender: &str, receiver: &str, call_id: &str) -> Admission {
        let stale = self
            .history
            .iter_mut()
            .find(|r| r.status == RecordStatus::Open && r.sender == receiver);

        let interrupted = match stale {
            Some(record) => {
                record.status = RecordStatus::Interrupted;
                tracing::debug!(
                    interrupted_sender = %record.sender,
                    interrupted_receiver = %record.receiver,
                    call_id = %record.call_id,
                    %sender,
                    "handoff preempts an unresolved exchange"
                );
                Some(record.clone())
            }
            None => None,
        };

        let record = self.open_record(sender, receiver, call_id);
        match interrupted {
            Some(interrupted) => Admission::Preempted {
                interrupted,
                record,
            },
            None => Admission::Fresh { record },
        }
    }

    fn open_record(&mut self, sender: &str, receiver: &str, call_id: &str) -> RecordId {
        self.history.push(ConversationRecord::new(sender, receiver, call_id));
        RecordId(self.history.len() - 1)
    }

    /// Mark `record` as completed.
    ///
    /// Returns the status the record had before, so the caller can tell
    /// whether its exchange was interrupted while it ran.
    pub fn complete(&mut self, record: RecordId) -> Option<RecordStatus> {
        let record = self.history.get_mut(record.0)?;
        let previous = record.status;
        if previous == RecordStatus::Open {
            record.status = RecordStatus::Completed;
        }
        Some(previous)
    }

    pub fn history(&self) -> &[ConversationRecord] {
        &self.history
    }

    /// Records whose nested invocation is still running.
    pub fn open(&self) -> impl Iterator<Item = &ConversationRecord> {
        self.history
            .iter()
            .filter(|r| r.status == RecordStatus::Open)
    }

}
