use std::collections::BTreeMap;

use super::{HistoryEntry, StageEvent};

/// One completed stage, reduced from its enter/leave event pair.
#[derive(Debug)]
pub struct StageSummary {
    pub name: String,
    pub duration_ms: i64,
    pub fields: BTreeMap<String, String>,
}

/// Collapse the raw event stream into one summary per stage. Events are
/// paired by position, not by name: event 2i enters, event 2i+1 leaves.
pub fn simplify(events: &[StageEvent]) -> Vec<StageSummary> {
    events
        .chunks(2)
        .filter_map(|pair| match pair {
            [enter, leave] => Some(StageSummary {
                name: leave.name.clone(),
                duration_ms: leave.timestamp_ms - enter.timestamp_ms,
                fields: leave.fields.clone().unwrap_or_default(),
            }),
            _ => None,
        })
        .collect()
}

/// Render the whole conversation for `/review`: every inquiry with its
/// per-stage timing and the fields each stage reported on leave.
pub fn render(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return "There is nothing to review yet.".to_string();
    }

    let mut out = String::new();
    for (index, entry) in history.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} ({} ms)\n",
            index + 1,
            entry.inquiry,
            entry.duration_ms
        ));
        for stage in simplify(&entry.stages) {
            out.push_str(&format!("  {}: {} ms\n", stage.name, stage.duration_ms));
            for (key, value) in &stage.fields {
                out.push_str(&format!("    {}: {}\n", key, compact(value)));
            }
        }
    }
    out
}

/// Collapse a field value to one bounded line.
fn compact(value: &str) -> String {
    let line = value.split('\n').collect::<Vec<_>>().join(" ");
    match line.char_indices().nth(200) {
        Some((pos, _)) => format!("{}...", &line[..pos]),
        None => line,
    }
}
