mod config;
mod llm;
mod matcher;
mod pipeline;
mod repl;
mod search;
mod server;
mod telegram;
mod tester;

use std::sync::Arc;

use tracing::error;
use tracing_subscriber::EnvFilter;

use config::Config;
use llm::LlmClient;
use pipeline::Pipeline;
use search::SearchClient;

#[tokio::main]
async fn main() {
    // Load env
    let _ = dotenv::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(-1);
        }
    };

    init_tracing(&config);

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(-1);
    }
}

/// Each debug flag raises one module to debug level; everything else stays
/// at info.
fn init_tracing(config: &Config) {
    let mut directives = vec!["info".to_string()];
    if config.debug.chat {
        directives.push("gamal::llm=debug".to_string());
    }
    if config.debug.pipeline {
        directives.push("gamal::pipeline=debug".to_string());
    }
    if config.debug.search {
        directives.push("gamal::search=debug".to_string());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives.join(",")))
        .init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    let llm = Arc::new(LlmClient::new(&config)?);
    let search = Arc::new(SearchClient::new(&config)?);
    let pipeline = Arc::new(Pipeline::new(llm, search));

    let files: Vec<String> = std::env::args().skip(1).collect();
    if !files.is_empty() {
        let failures = tester::run_files(&pipeline, &files, config.debug.fail_exit).await?;
        if failures > 0 {
            std::process::exit(-1);
        }
        return Ok(());
    }

    if let Some(port) = config.http_port {
        return server::serve(pipeline, port).await;
    }

    if let Some(token) = config.telegram_token {
        return telegram::poll(pipeline, token).await;
    }

    repl::run(pipeline).await
}
