use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::pipeline::{review, Context, HistoryEntry, Pipeline, Silent};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

struct Update {
    update_id: i64,
    message: Option<(i64, String)>,
}

/// Telegram front-end: long-poll for updates, run each text message through
/// the pipeline, send the full answer back when it is ready. History is kept
/// per chat id; updates for one chat are handled in arrival order.
pub async fn poll(pipeline: Arc<Pipeline>, token: String) -> Result<()> {
    let client = reqwest::Client::new();
    let base = format!("https://api.telegram.org/bot{}", token);
    let mut histories: HashMap<i64, Vec<HistoryEntry>> = HashMap::new();
    let mut offset: i64 = 0;

    info!("Telegram front-end polling for updates");
    loop {
        match get_updates(&client, &base, offset).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some((chat_id, text)) = update.message else {
                        continue;
                    };
                    info!(chat_id, text = %text, "update received");

                    let history = histories.entry(chat_id).or_default();
                    let reply = match handle(&pipeline, history, &text).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!(chat_id, "{:#}", e);
                            "Sorry, something went wrong while answering that.".to_string()
                        }
                    };
                    if let Err(e) = send_message(&client, &base, chat_id, &reply).await {
                        warn!(chat_id, "sendMessage failed: {:#}", e);
                    }
                }
            }
            Err(e) => warn!("getUpdates failed: {:#}", e),
        }
        sleep(POLL_INTERVAL).await;
    }
}

async fn handle(
    pipeline: &Pipeline,
    history: &mut Vec<HistoryEntry>,
    text: &str,
) -> Result<String> {
    match text.trim() {
        "/reset" => {
            history.clear();
            Ok("History cleared.".to_string())
        }
        "/review" => Ok(review::render(history)),
        inquiry => {
            let ctx = Context::new(inquiry, history.clone(), Arc::new(Silent));
            let ctx = pipeline.run(ctx).await?;
            let answer = ctx.answer.clone();
            history.push(ctx.into_entry());
            if answer.is_empty() {
                Ok("I could not find anything relevant to that.".to_string())
            } else {
                Ok(answer)
            }
        }
    }
}

async fn get_updates(client: &reqwest::Client, base: &str, offset: i64) -> Result<Vec<Update>> {
    let resp = client
        .get(format!("{}/getUpdates", base))
        .query(&[("offset", offset.to_string())])
        .send()
        .await
        .context("getUpdates request failed")?;
    let payload: Value = resp
        .json()
        .await
        .context("failed to parse getUpdates response")?;

    let mut updates = Vec::new();
    if let Some(result) = payload["result"].as_array() {
        for item in result {
            let Some(update_id) = item["update_id"].as_i64() else {
                continue;
            };
            let chat_id = item["message"]["chat"]["id"].as_i64();
            let text = item["message"]["text"].as_str();
            let message = match (chat_id, text) {
                (Some(chat_id), Some(text)) => Some((chat_id, text.to_string())),
                _ => None,
            };
            updates.push(Update { update_id, message });
        }
    }
    Ok(updates)
}

async fn send_message(
    client: &reqwest::Client,
    base: &str,
    chat_id: i64,
    text: &str,
) -> Result<()> {
    client
        .post(format!("{}/sendMessage", base))
        .json(&json!({"chat_id": chat_id, "text": text}))
        .send()
        .await
        .context("sendMessage request failed")?
        .error_for_status()
        .context("sendMessage returned an error status")?;
    Ok(())
}
