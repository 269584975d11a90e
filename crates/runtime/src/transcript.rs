//! Serializable run records.
//!
//! The runtime does not persist anything. Hosts that keep transcripts take
//! these records and write them where they like, typically as JSON lines.

use crate::error::ErrorReport;
use crate::model::{ChatMessage, Context};
use crate::stream::ChatStreamEvent;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one agent loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordKind {
    RunStart,
    Message { message: ChatMessage },
    StreamEvent { event: ChatStreamEvent },
    /// `outcome` is `None` on success.
    RunEnd { outcome: Option<ErrorReport> },
}

/// One line of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub run_id: RunId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RecordKind,
}

/// Records of one run, in arrival order.
#[derive(Debug, Clone)]
pub struct Transcript {
    run_id: RunId,
    records: Vec<Record>,
}

impl Transcript {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            records: Vec::new(),
        }
    }

    /// One `Message` record per message, in context order.
    pub fn from_context(run_id: RunId, context: &Context) -> Self {
        let mut transcript = Self::new(run_id);
        for message in context.messages() {
            transcript.push(RecordKind::Message {
                message: message.clone(),
            });
        }
        transcript
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Append a record, assigning the next sequence number.
    pub fn push(&mut self, kind: RecordKind) -> &Record {
        let seq = self.records.len() as u64;
        self.records.push(Record {
            id: Uuid::new_v4(),
            run_id: self.run_id,
            seq,
            timestamp: Utc::now(),
            kind,
        });
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One JSON object per line, each line terminated by `\n`.
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PiError;

    #[test]
    fn from_context_one_record_per_message() {
        let mut context = Context::from_user("hi");
        context.push(ChatMessage::assistant("hello"));
        let transcript = Transcript::from_context(RunId::new(), &context);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.records()[1].seq, 1);
    }

    #[test]
    fn jsonl_round_trips_in_order() {
        let run_id = RunId::new();
        let mut transcript = Transcript::new(run_id);
        transcript.push(RecordKind::RunStart);
        transcript.push(RecordKind::Message {
            message: ChatMessage::user("hi"),
        });
        transcript.push(RecordKind::RunEnd {
            outcome: Some(PiError::Cancelled.report()),
        });

        let jsonl = transcript.to_jsonl().unwrap();
        let parsed: Vec<Record> = jsonl
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed.len(), 3);
        assert!(parsed.iter().all(|r| r.run_id == run_id));
        assert!(parsed.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(parsed[0].kind, RecordKind::RunStart);
        assert!(jsonl.lines().next().unwrap().contains("\"kind\":\"run_start\""));
    }
}
