use std::collections::BTreeMap;

use crate::llm::Message;
use crate::search::Reference;

use super::{codec, HistoryEntry};

/// How many past turns are replayed into the reason prompt.
const HISTORY_WINDOW: usize = 3;

/// The model is primed with this partial record and completes the rest,
/// which locks its output into the label grammar.
pub const REASON_PRIMER: &str = "TOOL: Google.\nLANGUAGE: ";

/// Appended to a completion that never produced a topic line, so the parse
/// anchor exists on the second attempt.
pub const TOPIC_FALLBACK: &str = "TOPIC: general knowledge.";

pub const REASON_PROMPT: &str = r#"You are Gamal, a world-class answering assistant.

Think step by step about the most recent inquiry. Reply using only the
following fields, one per line, in this order, and nothing else:

TOOL: the search engine to consult. Always Google.
LANGUAGE: the language of the inquiry, e.g. English, French, Spanish.
THOUGHT: your thinking about what the inquiry is really after.
KEYPHRASES: the key phrases to search for, short and specific.
OBSERVATION: the concise result of the search.
TOPIC: the specific topic covering the inquiry, e.g. geography, business."#;

pub const REASON_EXAMPLE: &str = r#"Here is an example:

INQUIRY: Pourquoi le lac de Pitch est-il célèbre ?
TOOL: Google.
LANGUAGE: French.
THOUGHT: Il s'agit du lac de Pitch, à La Brea, à Trinité-et-Tobago.
KEYPHRASES: lac de Pitch à Trinité-et-Tobago.
OBSERVATION: Le lac de Pitch est le plus grand gisement naturel d'asphalte au monde.
TOPIC: géographie."#;

pub const RESPOND_PROMPT: &str = r#"You are Gamal, a world-class answering assistant. Answer the inquiry in {LANGUAGE}, and only in {LANGUAGE}.

Ground the answer exclusively in the numbered references below, given in the
format [citation:x] reference. End every sentence with the [citation:x]
marker of the reference backing it. Prefer the three most relevant
references. Keep the answer to at most three sentences, unless the inquiry
explicitly asks for more.

These are the references:

{REFERENCES}"#;

/// Messages for the reason stage: the system prompt (with the worked example
/// when the conversation is fresh), the recent turns replayed as the model's
/// own records, the inquiry, and the primer the model completes from.
pub fn reason_messages(inquiry: &str, history: &[HistoryEntry]) -> Vec<Message> {
    let recent = &history[history.len().saturating_sub(HISTORY_WINDOW)..];

    let mut system = REASON_PROMPT.to_string();
    if recent.is_empty() {
        system.push_str("\n\n");
        system.push_str(REASON_EXAMPLE);
    }

    let mut messages = vec![Message::system(system)];
    for entry in recent {
        messages.push(Message::user(&entry.inquiry));
        messages.push(Message::assistant(replay_record(entry)));
    }
    messages.push(Message::user(inquiry));
    messages.push(Message::assistant(REASON_PRIMER));
    messages
}

/// A past turn rendered as the record the model would have produced for it,
/// with the delivered answer standing in as the observation.
fn replay_record(entry: &HistoryEntry) -> String {
    let mut fields = BTreeMap::new();
    fields.insert("tool".to_string(), "Google.".to_string());
    fields.insert("thought".to_string(), entry.thought.clone());
    fields.insert("keyphrases".to_string(), entry.keyphrases.clone());
    fields.insert("observation".to_string(), entry.answer.clone());
    fields.insert("topic".to_string(), entry.topic.clone());
    codec::construct(&fields)
}

/// Messages for the respond stage.
pub fn respond_messages(inquiry: &str, language: &str, references: &[Reference]) -> Vec<Message> {
    let prompt = RESPOND_PROMPT
        .replace("{LANGUAGE}", language)
        .replace("{REFERENCES}", &reference_lines(references));
    vec![Message::system(prompt), Message::user(inquiry)]
}

/// Numbered reference lines interpolated into the respond prompt.
pub fn reference_lines(references: &[Reference]) -> String {
    references
        .iter()
        .map(|r| format!("[citation:{}] {} - {}", r.position, r.title, r.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}
