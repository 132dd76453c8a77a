use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use crate::pipeline::citations::CitationRewriter;
use crate::pipeline::{review, Context, Delegates, HistoryEntry, Pipeline};

/// Pipes the streamed answer to stdout through the citation rewriter.
struct TerminalDelegates {
    rewriter: Mutex<CitationRewriter>,
}

impl TerminalDelegates {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            rewriter: Mutex::new(CitationRewriter::new()),
        })
    }

    fn flush(&self) -> String {
        match self.rewriter.lock() {
            Ok(mut rewriter) => rewriter.flush(),
            Err(_) => String::new(),
        }
    }
}

impl Delegates for TerminalDelegates {
    fn stream(&self, delta: &str) {
        let Ok(mut rewriter) = self.rewriter.lock() else {
            return;
        };
        let ready = rewriter.push(delta);
        if !ready.is_empty() {
            print!("{}", ready);
            let _ = std::io::stdout().flush();
        }
    }
}

/// Interactive terminal front-end. One process-wide conversation; inquiries
/// run one at a time.
pub async fn run(pipeline: Arc<Pipeline>) -> Result<()> {
    let mut history: Vec<HistoryEntry> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!(">> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let inquiry = line.trim();
        if inquiry.is_empty() {
            continue;
        }

        match inquiry {
            "!reset" | "/reset" => {
                history.clear();
                println!("History cleared.");
                continue;
            }
            "!review" | "/review" => {
                println!("{}", review::render(&history));
                continue;
            }
            _ => {}
        }

        let delegates = TerminalDelegates::new();
        let ctx = Context::new(inquiry, history.clone(), delegates.clone());
        match pipeline.run(ctx).await {
            Ok(ctx) => {
                println!("{}", delegates.flush());
                history.push(ctx.into_entry());
            }
            Err(e) => error!("{:#}", e),
        }
    }

    Ok(())
}
