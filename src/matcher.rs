use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

const HIGHLIGHT: &str = "\x1b[7m";
const RESET: &str = "\x1b[0m";

/// An expected-answer check: a conjunction of case-insensitive regex probes
/// compiled from the compact `/…/` fence syntax. A string without fences is
/// one probe matching the whole string.
pub struct Expectation {
    probes: Vec<Regex>,
}

impl Expectation {
    pub fn compile(expected: &str) -> Result<Self> {
        let bodies = fence_bodies(expected);
        let sources = if bodies.is_empty() {
            vec![expected.to_string()]
        } else {
            bodies
        };

        let probes = sources
            .iter()
            .map(|source| {
                RegexBuilder::new(source)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("invalid pattern: /{}/", source))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { probes })
    }

    /// True iff every probe matches the target at least once.
    pub fn matches(&self, target: &str) -> bool {
        self.probes.iter().all(|probe| probe.is_match(target))
    }

    /// The target with every probe match wrapped in reverse video, for the
    /// test report.
    pub fn highlight(&self, target: &str) -> String {
        let mut spans: Vec<(usize, usize)> = self
            .probes
            .iter()
            .flat_map(|probe| probe.find_iter(target).map(|m| (m.start(), m.end())))
            .collect();
        // Insert back to front so earlier spans keep their byte offsets.
        spans.sort_by(|a, b| b.cmp(a));
        spans.dedup();

        let mut out = target.to_string();
        for (start, end) in spans {
            out.insert_str(end, RESET);
            out.insert_str(start, HIGHLIGHT);
        }
        out
    }
}

/// Bodies of the `/…/` fences in order. `\/` escapes a literal slash inside
/// a fence; other escapes pass through to the regex engine. Empty fences
/// are dropped. An unterminated fence is ignored.
fn fence_bodies(expected: &str) -> Vec<String> {
    let mut bodies = Vec::new();
    let mut body = String::new();
    let mut in_fence = false;

    let mut chars = expected.chars();
    while let Some(ch) = chars.next() {
        if !in_fence {
            if ch == '/' {
                in_fence = true;
                body.clear();
            }
            continue;
        }
        match ch {
            '\\' => match chars.next() {
                Some('/') => body.push('/'),
                Some(other) => {
                    body.push('\\');
                    body.push(other);
                }
                None => body.push('\\'),
            },
            '/' => {
                in_fence = false;
                if !body.is_empty() {
                    bodies.push(body.clone());
                }
            }
            other => body.push(other),
        }
    }

    bodies
}
