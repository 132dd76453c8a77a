use std::collections::BTreeMap;

use anyhow::Result;
use tracing::warn;

use crate::llm::LlmClient;

use super::{prompts, Context};

const STAGE: &str = "Respond";

/// Synthesize the cited answer from the collected references, streaming it
/// through the `stream` delegate as the model produces it.
///
/// With no references there is nothing to ground an answer in; the stage
/// degrades to an empty answer rather than letting the model improvise.
pub async fn run(llm: &LlmClient, mut ctx: Context) -> Result<Context> {
    ctx.enter(STAGE);

    if ctx.references.is_empty() {
        warn!(inquiry = %ctx.inquiry, "no references to ground the answer");
        ctx.answer = String::new();
    } else {
        let messages = prompts::respond_messages(&ctx.inquiry, &ctx.language, &ctx.references);
        let delegates = ctx.delegates.clone();
        let sink = move |delta: &str| delegates.stream(delta);
        ctx.answer = llm.chat(&messages, Some(&sink)).await?;
    }

    let mut fields = BTreeMap::new();
    fields.insert("answer".to_string(), ctx.answer.clone());
    ctx.leave(STAGE, fields);
    Ok(ctx)
}
