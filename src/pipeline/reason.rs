use std::collections::BTreeMap;

use anyhow::Result;
use tracing::debug;

use crate::llm::LlmClient;

use super::{codec, prompts, Context};

const STAGE: &str = "Reason";

/// Extract language, topic, thought and search keyphrases from the inquiry.
///
/// The model completes from a primed partial record; if the completion
/// carries no keyphrases, the primer is extended with the model's own
/// thought and the call is made once more. A run without keyphrases is not
/// an error: search simply has nothing to do.
pub async fn run(llm: &LlmClient, mut ctx: Context) -> Result<Context> {
    ctx.enter(STAGE);

    let mut messages = prompts::reason_messages(&ctx.inquiry, &ctx.history);
    let completion = llm.chat(&messages, None).await?;
    let mut fields = parse_completion(prompts::REASON_PRIMER, &completion);

    if field(&fields, "keyphrases").is_empty() {
        let primer = format!(
            "TOOL: Google.\nTHOUGHT: {}\nKEYPHRASES: ",
            field(&fields, "thought")
        );
        if let Some(last) = messages.last_mut() {
            last.content = primer.clone();
        }
        debug!("no keyphrases extracted, re-priming");
        let completion = llm.chat(&messages, None).await?;
        for (key, value) in parse_completion(&primer, &completion) {
            if !value.is_empty() {
                fields.insert(key, value);
            }
        }
    }

    ctx.language = match field(&fields, "language") {
        "" => "English".to_string(),
        language => language.to_string(),
    };
    ctx.topic = field(&fields, "topic").to_string();
    ctx.thought = field(&fields, "thought").to_string();
    ctx.keyphrases = field(&fields, "keyphrases").to_string();
    ctx.observation = field(&fields, "observation").to_string();

    let mut leave = BTreeMap::new();
    leave.insert("language".to_string(), ctx.language.clone());
    leave.insert("topic".to_string(), ctx.topic.clone());
    leave.insert("thought".to_string(), ctx.thought.clone());
    leave.insert("keyphrases".to_string(), ctx.keyphrases.clone());
    leave.insert("observation".to_string(), ctx.observation.clone());
    ctx.leave(STAGE, leave);
    Ok(ctx)
}

fn field<'a>(fields: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    fields.get(key).map(String::as_str).unwrap_or("")
}

/// The model completes from the primer, so the primer text is part of the
/// record. A completion that never closed with a topic line gets one
/// appended so the parse anchor exists.
fn parse_completion(primer: &str, completion: &str) -> BTreeMap<String, String> {
    let full = format!("{}{}", primer, completion);
    let fields = codec::parse(&full);
    if !fields.is_empty() {
        return fields;
    }
    codec::parse(&format!("{}\n{}", full, prompts::TOPIC_FALLBACK))
}
