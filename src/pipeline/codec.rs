use std::collections::BTreeMap;

/// Record markers in serialization order. `TOPIC` always closes a record and
/// doubles as the parse anchor.
pub const MARKERS: [&str; 7] = [
    "INQUIRY",
    "TOOL",
    "LANGUAGE",
    "THOUGHT",
    "KEYPHRASES",
    "OBSERVATION",
    "TOPIC",
];

/// Serialize fields into `MARKER: value` lines, in marker order.
/// Keys are matched case-insensitively; absent or empty values are omitted.
pub fn construct(fields: &BTreeMap<String, String>) -> String {
    let mut lines = Vec::new();
    for marker in MARKERS {
        let value = fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(marker))
            .map(|(_, value)| value.trim())
            .unwrap_or("");
        if !value.is_empty() {
            lines.push(format!("{}: {}", marker, value));
        }
    }
    lines.join("\n")
}

/// Pull labelled fields out of free-form model output.
///
/// The scan anchors on the *last* `TOPIC:` (the model completes from a primed
/// prefix, so echoes of earlier example records must not shadow the actual
/// completion) and walks the remaining markers back to front, each time
/// truncating the text so an earlier marker cannot match inside a later
/// field's value. Returns lowercase keys; an input without the `TOPIC:`
/// anchor yields an empty map.
pub fn parse(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();

    let Some(anchor) = text.rfind("TOPIC:") else {
        return fields;
    };
    let topic = text[anchor + "TOPIC:".len()..].trim();
    fields.insert("topic".to_string(), topic.to_string());

    let mut prefix = &text[..anchor];
    for marker in MARKERS[..MARKERS.len() - 1].iter().rev() {
        let tag = format!("{}:", marker);
        if let Some(pos) = prefix.rfind(&tag) {
            let after = &prefix[pos + tag.len()..];
            let value = after.lines().next().unwrap_or("").trim();
            fields.insert(marker.to_lowercase(), value.to_string());
            prefix = &prefix[..pos];
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_construct_in_marker_order() {
        let fields = record(&[
            ("topic", "geography."),
            ("tool", "Google."),
            ("language", "English."),
        ]);
        assert_eq!(
            construct(&fields),
            "TOOL: Google.\nLANGUAGE: English.\nTOPIC: geography."
        );
    }

    #[test]
    fn test_construct_skips_empty_values() {
        let fields = record(&[("tool", "Google."), ("thought", ""), ("topic", "sport.")]);
        assert_eq!(construct(&fields), "TOOL: Google.\nTOPIC: sport.");
    }

    #[test]
    fn test_construct_case_insensitive_keys() {
        let fields = record(&[("Topic", "history."), ("LANGUAGE", "French.")]);
        assert_eq!(construct(&fields), "LANGUAGE: French.\nTOPIC: history.");
    }

    #[test]
    fn test_round_trip() {
        let fields = record(&[
            ("tool", "Google."),
            ("language", "English."),
            ("thought", "This is about the red planet."),
            ("keyphrases", "fourth planet from the sun."),
            ("observation", "Mars is the fourth planet."),
            ("topic", "astronomy."),
        ]);
        let parsed = parse(&construct(&fields));
        for (key, value) in &fields {
            assert_eq!(parsed.get(key), Some(value), "key {}", key);
        }
    }

    #[test]
    fn test_parse_last_occurrence_wins() {
        let parsed = parse("TOPIC: a\nTOPIC: b");
        assert_eq!(parsed.get("topic").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_parse_ignores_earlier_echoes() {
        let text = "LANGUAGE: French.\nTOPIC: géographie.\n\
                    TOOL: Google.\nLANGUAGE: English.\nKEYPHRASES: pitch lake.\nTOPIC: geography.";
        let parsed = parse(text);
        assert_eq!(parsed.get("language").map(String::as_str), Some("English."));
        assert_eq!(parsed.get("topic").map(String::as_str), Some("geography."));
        assert_eq!(
            parsed.get("keyphrases").map(String::as_str),
            Some("pitch lake.")
        );
    }

    #[test]
    fn test_parse_value_is_first_line_only() {
        let text = "THOUGHT: first line\nstray second line\nTOPIC: x";
        let parsed = parse(text);
        assert_eq!(
            parsed.get("thought").map(String::as_str),
            Some("first line")
        );
    }

    #[test]
    fn test_parse_without_anchor_is_empty() {
        assert!(parse("TOOL: Google.\nLANGUAGE: English.").is_empty());
    }

    #[test]
    fn test_parse_with_appended_fallback_recovers_fields() {
        let text = format!(
            "{}\nTOPIC: general knowledge.",
            "TOOL: Google.\nKEYPHRASES: dwarf planets."
        );
        let parsed = parse(&text);
        assert_eq!(
            parsed.get("keyphrases").map(String::as_str),
            Some("dwarf planets.")
        );
        assert_eq!(
            parsed.get("topic").map(String::as_str),
            Some("general knowledge.")
        );
    }

    #[test]
    fn test_parse_tolerates_surrounding_chatter() {
        let text = "Sure, here is my reasoning:\n\n\
                    TOOL: Google.\nLANGUAGE: English.\n\
                    THOUGHT: The inquiry asks about Google's leadership.\n\
                    KEYPHRASES: current CEO of Google.\nTOPIC: business.";
        let parsed = parse(text);
        assert_eq!(
            parsed.get("keyphrases").map(String::as_str),
            Some("current CEO of Google.")
        );
        assert_eq!(parsed.get("tool").map(String::as_str), Some("Google."));
    }
}
