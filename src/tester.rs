use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::info;

use crate::matcher::Expectation;
use crate::pipeline::{Context, HistoryEntry, Pipeline, Silent};

/// Fields of the most recent pipeline run that directives can assert on.
struct RunOutcome {
    keyphrases: String,
    topic: String,
    answer: String,
}

/// Run each test file in order. Returns the total number of mismatches.
pub async fn run_files(
    pipeline: &Arc<Pipeline>,
    files: &[String],
    fail_exit: bool,
) -> Result<usize> {
    let mut failures = 0;
    for file in files {
        failures += run_file(pipeline, file, fail_exit).await?;
    }
    if failures > 0 {
        eprintln!("{} expectation(s) failed.", failures);
    }
    Ok(failures)
}

/// One directive per line, `Role: content`. `#` starts an end-of-line
/// comment. An unknown role is a broken test file and aborts the process.
async fn run_file(pipeline: &Arc<Pipeline>, file: &str, fail_exit: bool) -> Result<usize> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file))?;
    info!(file, "running test file");

    let mut history: Vec<HistoryEntry> = Vec::new();
    let mut last: Option<RunOutcome> = None;
    let mut failures = 0;

    for (index, raw) in content.lines().enumerate() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((role, text)) = line.split_once(':') else {
            eprintln!("{}:{}: not a directive: {}", file, index + 1, raw);
            std::process::exit(-1);
        };
        let role = role.trim();
        let text = text.trim();

        match role {
            "Story" => {
                history.clear();
                last = None;
                println!("\n──── {} ────", text);
            }
            "User" => {
                println!(">> {}", text);
                let ctx = Context::new(text, history.clone(), Arc::new(Silent));
                let ctx = pipeline.run(ctx).await?;
                last = Some(RunOutcome {
                    keyphrases: ctx.keyphrases.clone(),
                    topic: ctx.topic.clone(),
                    answer: ctx.answer.clone(),
                });
                history.push(ctx.into_entry());
            }
            "Assistant" => {
                failures += check(file, index + 1, text, &last, |o| o.answer.as_str(), fail_exit)?;
            }
            "Pipeline.Reason.Keyphrases" => {
                failures += check(
                    file,
                    index + 1,
                    text,
                    &last,
                    |o| o.keyphrases.as_str(),
                    fail_exit,
                )?;
            }
            "Pipeline.Reason.Topic" => {
                failures += check(file, index + 1, text, &last, |o| o.topic.as_str(), fail_exit)?;
            }
            other => {
                eprintln!("{}:{}: unknown role: {}", file, index + 1, other);
                std::process::exit(-1);
            }
        }
    }

    Ok(failures)
}

fn check(
    file: &str,
    line: usize,
    expected: &str,
    last: &Option<RunOutcome>,
    select: impl Fn(&RunOutcome) -> &str,
    fail_exit: bool,
) -> Result<usize> {
    let expectation = Expectation::compile(expected)
        .with_context(|| format!("{}:{}: bad expectation", file, line))?;
    let actual = last.as_ref().map(|outcome| select(outcome)).unwrap_or("");

    if expectation.matches(actual) {
        println!("{}", expectation.highlight(actual));
        return Ok(0);
    }

    eprintln!("{}:{}: mismatch", file, line);
    eprintln!("  expected {}", expected);
    eprintln!("  actual   {}", actual);
    if fail_exit {
        std::process::exit(-1);
    }
    Ok(1)
}
