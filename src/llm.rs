use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;

/// One chat turn. Insertion order is significant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Sequences that end a completion. `INQUIRY: ` stops the model from
/// hallucinating the next user turn after a primed record.
const STOP_SEQUENCES: [&str; 5] = [
    "<|im_end|>",
    "<|end|>",
    "<|eot_id|>",
    "<|end_of_turn|>",
    "INQUIRY: ",
];

const MAX_TOKENS: u32 = 400;

pub type Sink<'a> = &'a (dyn Fn(&str) + Send + Sync);

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    streaming: bool,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.llm_base_url.clone(),
            model: config.llm_model.clone(),
            api_key: config.llm_api_key.clone(),
            streaming: config.llm_streaming,
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }

    /// Chat completion. With a sink (and streaming enabled), deltas are
    /// forwarded to the sink as they arrive; either way the full assistant
    /// text is returned. A non-2xx status aborts with no retry.
    pub async fn chat(&self, messages: &[Message], sink: Option<Sink<'_>>) -> Result<String> {
        let stream = sink.is_some() && self.streaming;
        let body = json!({
            "messages": messages,
            "model": self.model,
            "stop": STOP_SEQUENCES,
            "max_tokens": MAX_TOKENS,
            "temperature": 0,
            "stream": stream,
        });

        for message in messages {
            debug!(role = %message.role, content = %message.content, "chat request");
        }

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("chat request failed")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("chat endpoint returned {}", status);
        }

        let content = match (stream, sink) {
            (true, Some(sink)) => self.read_stream(resp, sink).await?,
            (_, sink) => {
                let text = resp
                    .text()
                    .await
                    .context("failed to read chat response")?;
                let payload: Value = serde_json::from_str(&text)
                    .context("failed to parse chat response")?;
                let content = payload["choices"]
                    .get(0)
                    .and_then(|c| c["message"]["content"].as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if let Some(sink) = sink {
                    sink(&content);
                }
                content
            }
        };

        debug!(content = %content, "chat response");
        Ok(content)
    }

    async fn read_stream(&self, mut resp: reqwest::Response, sink: Sink<'_>) -> Result<String> {
        let mut parser = ChatStreamParser::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .context("failed to read streaming chunk")?
        {
            parser.push(&chunk, sink);
            if parser.is_done() {
                break;
            }
        }
        Ok(parser.finish(sink))
    }
}

/// Incremental decoder for the `data:`-framed streaming transcript.
///
/// Network reads may split the transcript anywhere, including inside a
/// multi-byte UTF-8 sequence, so bytes are buffered and only complete
/// newline-terminated lines are decoded; the trailing partial line is
/// carried over until more bytes arrive or the stream ends.
pub struct ChatStreamParser {
    buffer: Vec<u8>,
    answer: String,
    done: bool,
}

impl ChatStreamParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            answer: String::new(),
            done: false,
        }
    }

    /// True once the `data: [DONE]` terminator has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one network read, emitting any completed deltas to the sink.
    pub fn push(&mut self, bytes: &[u8], sink: Sink<'_>) {
        if self.done {
            return;
        }
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buffer, rest);
            let line = String::from_utf8_lossy(&line[..pos]).into_owned();
            self.handle_line(line.trim_end_matches('\r'), sink);
            if self.done {
                break;
            }
        }
    }

    /// Drain the carried partial line (a final frame may arrive without a
    /// trailing newline) and return the accumulated answer.
    pub fn finish(mut self, sink: Sink<'_>) -> String {
        if !self.done && !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            self.handle_line(line.trim_end_matches('\r'), sink);
        }
        self.answer
    }

    fn handle_line(&mut self, line: &str, sink: Sink<'_>) {
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        if line == "data: [DONE]" {
            self.done = true;
            return;
        }
        let Some(payload) = line.strip_prefix("data: ") else {
            return;
        };
        match serde_json::from_str::<Value>(payload) {
            Ok(frame) => {
                let delta = frame["choices"]
                    .get(0)
                    .and_then(|c| c["delta"]["content"].as_str())
                    .unwrap_or("");
                self.take_delta(delta, sink);
            }
            // A payload that does not parse was truncated mid-frame; it stays
            // out of the answer and the next bytes complete it.
            Err(_) => debug!(line = %line, "dropping unparseable frame"),
        }
    }

    fn take_delta(&mut self, delta: &str, sink: Sink<'_>) {
        // Keep-alive and role-only frames carry no text.
        if delta.is_empty() {
            return;
        }
        let delta = if self.answer.is_empty() {
            delta.trim_start()
        } else {
            delta
        };
        if delta.is_empty() {
            return;
        }
        self.answer.push_str(delta);
        sink(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n",
            json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn feed(transcript: &[u8], chunks: &[&[u8]]) -> (String, String) {
        let streamed = Mutex::new(String::new());
        let sink = |delta: &str| streamed.lock().unwrap().push_str(delta);
        let mut parser = ChatStreamParser::new();
        if chunks.is_empty() {
            parser.push(transcript, &sink);
        } else {
            for chunk in chunks {
                parser.push(chunk, &sink);
            }
        }
        let answer = parser.finish(&sink);
        let streamed = streamed.into_inner().unwrap();
        (answer, streamed)
    }

    #[test]
    fn test_stream_basic() {
        let transcript = format!("{}{}data: [DONE]\n", frame("Hello"), frame(" world"));
        let (answer, streamed) = feed(transcript.as_bytes(), &[]);
        assert_eq!(answer, "Hello world");
        assert_eq!(streamed, "Hello world");
    }

    #[test]
    fn test_stream_trims_leading_whitespace_once() {
        let transcript = format!(
            "{}{}{}data: [DONE]\n",
            frame("  "),
            frame("  Mars is"),
            frame(" a planet.  ")
        );
        let (answer, _) = feed(transcript.as_bytes(), &[]);
        assert_eq!(answer, "Mars is a planet.  ");
    }

    #[test]
    fn test_stream_skips_comments_and_empty_deltas() {
        let transcript = format!(
            ": keep-alive\n{}{}{}data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            frame("answer"),
            frame("")
        );
        let (answer, _) = feed(transcript.as_bytes(), &[]);
        assert_eq!(answer, "answer");
    }

    #[test]
    fn test_stream_stops_at_done() {
        let transcript = format!("{}data: [DONE]\n{}", frame("before"), frame("after"));
        let (answer, _) = feed(transcript.as_bytes(), &[]);
        assert_eq!(answer, "before");
    }

    #[test]
    fn test_stream_split_mid_frame() {
        let transcript = format!("{}data: [DONE]\n", frame("Hello world"));
        let bytes = transcript.as_bytes();
        let (answer, streamed) = feed(bytes, &[&bytes[..17], &bytes[17..]]);
        assert_eq!(answer, "Hello world");
        assert_eq!(streamed, "Hello world");
    }

    #[test]
    fn test_stream_split_safety_at_every_boundary() {
        let transcript = format!(
            ": comment\n{}{}{}data: [DONE]\n",
            frame("réponse"),
            frame(" en"),
            frame(" français")
        );
        let bytes = transcript.as_bytes();
        let (whole, _) = feed(bytes, &[]);
        for cut in 0..bytes.len() {
            let (split, streamed) = feed(bytes, &[&bytes[..cut], &bytes[cut..]]);
            assert_eq!(split, whole, "split at byte {}", cut);
            assert_eq!(streamed, whole, "sink at byte {}", cut);
        }
    }

    #[test]
    fn test_stream_final_frame_without_newline() {
        let transcript = format!(
            "{}{}",
            frame("partial"),
            "data: {\"choices\":[{\"delta\":{\"content\":\" end\"}}]}"
        );
        let (answer, _) = feed(transcript.as_bytes(), &[]);
        assert_eq!(answer, "partial end");
    }

    #[test]
    fn test_stream_truncated_tail_is_dropped() {
        let transcript = format!("{}data: {{\"choices\":[{{\"del", frame("kept"));
        let (answer, _) = feed(transcript.as_bytes(), &[]);
        assert_eq!(answer, "kept");
    }
}
