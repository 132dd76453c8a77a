use once_cell::sync::Lazy;
use regex::Regex;

/// Single-digit citation numbers only; a two-digit marker passes through as
/// literal text.
static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[citation:(\d)\]").expect("valid citation pattern"));

/// Marker width in bytes.
const MARKER_WIDTH: usize = "[citation:x]".len();

/// Three marker widths are retained unemitted, so a marker split across
/// stream chunks always reassembles before anything containing it leaves
/// the buffer.
const LOOKAHEAD: usize = 3 * MARKER_WIDTH;

/// Rewrites streamed `[citation:N]` markers into densely renumbered `[k]`,
/// where `k` is the order in which the citation first appeared.
pub struct CitationRewriter {
    buffer: String,
    refs: Vec<char>,
}

impl CitationRewriter {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            refs: Vec::new(),
        }
    }

    /// Feed a chunk of answer text; returns the text that is safe to emit.
    pub fn push(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        self.rewrite();

        if self.buffer.len() > LOOKAHEAD {
            let mut cut = self.buffer.len() - LOOKAHEAD;
            while !self.buffer.is_char_boundary(cut) {
                cut -= 1;
            }
            let rest = self.buffer.split_off(cut);
            return std::mem::replace(&mut self.buffer, rest);
        }
        String::new()
    }

    /// Emit the remainder, right-trimmed, and reset for the next answer.
    pub fn flush(&mut self) -> String {
        self.rewrite();
        let out = self.buffer.trim_end().to_string();
        self.buffer.clear();
        self.refs.clear();
        out
    }

    fn rewrite(&mut self) {
        loop {
            let Some((range, digit)) = CITATION.captures(&self.buffer).and_then(|caps| {
                let range = caps.get(0)?.range();
                let digit = caps[1].chars().next()?;
                Some((range, digit))
            }) else {
                break;
            };
            let numbered = match self.refs.iter().position(|&r| r == digit) {
                Some(index) => index + 1,
                None => {
                    self.refs.push(digit);
                    self.refs.len()
                }
            };
            self.buffer
                .replace_range(range, &format!("[{}]", numbered));
        }
    }
}

impl Default for CitationRewriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite_chunked(text: &str, chunk_size: usize) -> String {
        let mut rewriter = CitationRewriter::new();
        let mut out = String::new();
        let bytes = text.as_bytes();
        let mut start = 0;
        while start < bytes.len() {
            let mut end = (start + chunk_size).min(bytes.len());
            while !text.is_char_boundary(end) {
                end += 1;
            }
            out.push_str(&rewriter.push(&text[start..end]));
            start = end;
        }
        out.push_str(&rewriter.flush());
        out
    }

    #[test]
    fn test_dense_renumbering() {
        assert_eq!(
            rewrite_chunked("foo[citation:3] bar[citation:1] baz[citation:3]", 1000),
            "foo[1] bar[2] baz[1]"
        );
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let text = "Mars is the fourth planet[citation:2]. It is red[citation:1], \
                    quite red[citation:2].";
        let whole = rewrite_chunked(text, 1000);
        for chunk_size in 1..=text.len() {
            assert_eq!(
                rewrite_chunked(text, chunk_size),
                whole,
                "chunk size {}",
                chunk_size
            );
        }
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut rewriter = CitationRewriter::new();
        let mut out = rewriter.push("an answer[cita");
        out.push_str(&rewriter.push("tion:7] end"));
        out.push_str(&rewriter.flush());
        assert_eq!(out, "an answer[1] end");
    }

    #[test]
    fn test_two_digit_marker_passes_through() {
        assert_eq!(
            rewrite_chunked("a[citation:10] b[citation:2]", 1000),
            "a[citation:10] b[1]"
        );
    }

    #[test]
    fn test_flush_right_trims_and_resets() {
        let mut rewriter = CitationRewriter::new();
        rewriter.push("first[citation:5]  \n");
        assert_eq!(rewriter.flush(), "first[1]");
        rewriter.push("second[citation:9]");
        // A fresh answer starts renumbering from 1 again.
        assert_eq!(rewriter.flush(), "second[1]");
    }

    #[test]
    fn test_multibyte_text_around_markers() {
        let text = "Le lac de Pitch est célèbre[citation:1] — très célèbre[citation:1].";
        let whole = rewrite_chunked(text, 1000);
        assert_eq!(whole, "Le lac de Pitch est célèbre[1] — très célèbre[1].");
        for chunk_size in 1..=8 {
            assert_eq!(rewrite_chunked(text, chunk_size), whole);
        }
    }

    #[test]
    fn test_long_text_emits_before_flush() {
        let mut rewriter = CitationRewriter::new();
        let text = "x".repeat(200);
        let emitted = rewriter.push(&text);
        assert_eq!(emitted.len(), 200 - LOOKAHEAD);
        assert_eq!(rewriter.flush(), "x".repeat(LOOKAHEAD));
    }
}
