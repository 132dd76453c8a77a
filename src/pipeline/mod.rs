pub mod citations;
pub mod codec;
pub mod prompts;
pub mod reason;
pub mod respond;
pub mod review;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::LlmClient;
use crate::search::{Reference, SearchClient};

/// Side-effect hooks a front-end supplies to observe a run: stage
/// transitions and streamed answer text. Every hook defaults to a no-op so
/// front-ends implement only what they need.
pub trait Delegates: Send + Sync {
    fn enter(&self, _stage: &str) {}
    fn leave(&self, _stage: &str, _fields: &BTreeMap<String, String>) {}
    fn stream(&self, _delta: &str) {}
}

/// Delegate set that observes nothing. Used where the answer is taken from
/// the final context instead of the stream.
pub struct Silent;

impl Delegates for Silent {}

/// One half of a stage boundary. Stages record exactly two events per run:
/// enter (no fields) and leave (with the stage's result fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub name: String,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

/// A completed inquiry. Append-only: entries are created from the final
/// context after the whole pipeline succeeds and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub inquiry: String,
    pub thought: String,
    pub keyphrases: String,
    pub topic: String,
    pub references: Vec<Reference>,
    pub answer: String,
    pub duration_ms: i64,
    pub stages: Vec<StageEvent>,
}

/// The value threaded through the stages. Each stage takes the context by
/// value and returns it with more fields filled in.
pub struct Context {
    pub inquiry: String,
    pub history: Vec<HistoryEntry>,
    pub language: String,
    pub topic: String,
    pub thought: String,
    pub keyphrases: String,
    pub observation: String,
    pub references: Vec<Reference>,
    pub answer: String,
    pub events: Vec<StageEvent>,
    pub delegates: Arc<dyn Delegates>,
}

impl Context {
    pub fn new(
        inquiry: impl Into<String>,
        history: Vec<HistoryEntry>,
        delegates: Arc<dyn Delegates>,
    ) -> Self {
        Self {
            inquiry: inquiry.into(),
            history,
            language: String::new(),
            topic: String::new(),
            thought: String::new(),
            keyphrases: String::new(),
            observation: String::new(),
            references: Vec::new(),
            answer: String::new(),
            events: Vec::new(),
            delegates,
        }
    }

    pub(crate) fn enter(&mut self, stage: &str) {
        debug!(stage, "entering stage");
        self.events.push(StageEvent {
            name: stage.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            fields: None,
        });
        self.delegates.enter(stage);
    }

    pub(crate) fn leave(&mut self, stage: &str, fields: BTreeMap<String, String>) {
        debug!(stage, ?fields, "leaving stage");
        self.delegates.leave(stage, &fields);
        self.events.push(StageEvent {
            name: stage.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            fields: Some(fields),
        });
    }

    /// Snapshot the completed run as a history entry.
    pub fn into_entry(self) -> HistoryEntry {
        let duration_ms = match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => last.timestamp_ms - first.timestamp_ms,
            _ => 0,
        };
        HistoryEntry {
            inquiry: self.inquiry,
            thought: self.thought,
            keyphrases: self.keyphrases,
            topic: self.topic,
            references: self.references,
            answer: self.answer,
            duration_ms,
            stages: self.events,
        }
    }
}

/// Composes reason → search → respond over the shared clients. Holds no
/// per-inquiry state; the context carries everything.
pub struct Pipeline {
    llm: Arc<LlmClient>,
    search: Arc<SearchClient>,
}

impl Pipeline {
    pub fn new(llm: Arc<LlmClient>, search: Arc<SearchClient>) -> Self {
        Self { llm, search }
    }

    /// Run the full chain. A stage failure aborts the run; events recorded
    /// up to that point stay on the context the caller still owns.
    pub async fn run(&self, ctx: Context) -> Result<Context> {
        let ctx = reason::run(&self.llm, ctx).await?;
        let ctx = self.search_stage(ctx).await?;
        let ctx = respond::run(&self.llm, ctx).await?;
        Ok(ctx)
    }

    async fn search_stage(&self, mut ctx: Context) -> Result<Context> {
        ctx.enter("Search");

        if ctx.keyphrases.is_empty() {
            debug!("nothing to search for");
            ctx.references = Vec::new();
        } else {
            ctx.references = self.search.search(&ctx.keyphrases).await?;
        }

        let mut fields = BTreeMap::new();
        fields.insert("keyphrases".to_string(), ctx.keyphrases.clone());
        fields.insert("references".to_string(), ctx.references.len().to_string());
        ctx.leave("Search", fields);
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_entry_duration_spans_all_events() {
        let mut ctx = Context::new("q", Vec::new(), Arc::new(Silent));
        ctx.events = vec![
            StageEvent {
                name: "Reason".to_string(),
                timestamp_ms: 100,
                fields: None,
            },
            StageEvent {
                name: "Reason".to_string(),
                timestamp_ms: 250,
                fields: Some(BTreeMap::new()),
            },
            StageEvent {
                name: "Respond".to_string(),
                timestamp_ms: 250,
                fields: None,
            },
            StageEvent {
                name: "Respond".to_string(),
                timestamp_ms: 900,
                fields: Some(BTreeMap::new()),
            },
        ];
        ctx.answer = "a".to_string();
        let entry = ctx.into_entry();
        assert_eq!(entry.duration_ms, 800);
        assert_eq!(entry.stages.len(), 4);
    }

    #[test]
    fn test_enter_and_leave_record_paired_events() {
        let mut ctx = Context::new("q", Vec::new(), Arc::new(Silent));
        ctx.enter("Reason");
        ctx.leave("Reason", BTreeMap::new());
        assert_eq!(ctx.events.len(), 2);
        assert!(ctx.events[0].fields.is_none());
        assert!(ctx.events[1].fields.is_some());
        assert!(ctx.events[1].timestamp_ms >= ctx.events[0].timestamp_ms);
    }
}
