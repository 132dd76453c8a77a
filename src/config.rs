use anyhow::{bail, Result};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "meta-llama/llama-3-8b-instruct";

/// Search keys are long opaque tokens; anything shorter is a paste error.
const MIN_SEARCH_KEY_LEN: usize = 64;
const MIN_TELEGRAM_TOKEN_LEN: usize = 40;

#[derive(Debug, Clone, Default)]
pub struct DebugFlags {
    pub chat: bool,
    pub pipeline: bool,
    pub search: bool,
    pub fail_exit: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_streaming: bool,
    pub you_api_key: String,
    pub http_port: Option<u16>,
    pub telegram_token: Option<String>,
    pub debug: DebugFlags,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let llm_base_url =
            dotenv::var("LLM_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let llm_api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
        let llm_model =
            dotenv::var("LLM_CHAT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let llm_streaming = dotenv::var("LLM_STREAMING")
            .map(|v| !v.eq_ignore_ascii_case("no"))
            .unwrap_or(true);

        let you_api_key = dotenv::var("YOU_API_KEY").unwrap_or_default();
        if you_api_key.len() < MIN_SEARCH_KEY_LEN {
            bail!(
                "YOU_API_KEY is required ({} characters or more) to reach the search API",
                MIN_SEARCH_KEY_LEN
            );
        }

        let http_port = dotenv::var("GAMAL_HTTP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok());
        let telegram_token = dotenv::var("GAMAL_TELEGRAM_TOKEN")
            .ok()
            .filter(|t| t.len() >= MIN_TELEGRAM_TOKEN_LEN);

        Ok(Self {
            llm_base_url,
            llm_api_key,
            llm_model,
            llm_streaming,
            you_api_key,
            http_port,
            telegram_token,
            debug: DebugFlags {
                chat: flag("LLM_DEBUG_CHAT"),
                pipeline: flag("LLM_DEBUG_PIPELINE"),
                search: flag("LLM_DEBUG_SEARCH"),
                fail_exit: flag("LLM_DEBUG_FAIL_EXIT"),
            },
        })
    }
}

fn flag(name: &str) -> bool {
    dotenv::var(name)
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("no"))
        .unwrap_or(false)
}
