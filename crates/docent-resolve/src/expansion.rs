//! Prompts and defensive parsing for the LLM-assisted query stages.
//!
//! Model output is untrusted text. Each parser either yields usable values or
//! reports `ParseFailed`, and the caller falls back.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use docent_index::Language;

/// Outcome of parsing free-form model output into variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed(Vec<String>),
    ParseFailed,
}

static LIST_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•·]+\s*|\(?\d{1,2}[.)、]\s+)").unwrap());

fn language_name(language: Language) -> &'static str {
    match language {
        Language::En => "English",
        Language::Zh => "Chinese",
    }
}

pub fn translation_prompt(query: &str, doc_language: Language) -> String {
    format!(
        "Translate the search query below into {}. Keep names, numbers and technical terms. \
         Output ONLY the translated query on a single line.\n\nQuery: {}",
        language_name(doc_language),
        query
    )
}

/// Single-line translation, or `None` if the reply is unusable.
pub fn clean_translation(reply: &str) -> Option<String> {
    let flat = reply.split_whitespace().collect::<Vec<_>>().join(" ");
    let flat = strip_quotes(&flat);
    let flat = flat
        .strip_prefix("Query:")
        .or_else(|| flat.strip_prefix("Translation:"))
        .unwrap_or(flat)
        .trim();
    (!flat.is_empty()).then(|| flat.to_string())
}

pub fn expansion_prompt(query: &str, doc_language: Language, n: usize) -> String {
    format!(
        "Write {} alternative phrasings of the search query below, in {}. \
         Vary vocabulary and specificity but keep the meaning. \
         Output one phrasing per line with no numbering or commentary.\n\nQuery: {}",
        n,
        language_name(doc_language),
        query
    )
}

/// Parse a newline- or list-delimited reply into at most `max` phrasings.
pub fn parse_variants(reply: &str, max: usize) -> ParseOutcome {
    let variants: Vec<String> = reply
        .lines()
        .map(|line| LIST_MARKER_RE.replace(line, "").into_owned())
        .map(|line| strip_quotes(line.trim()).trim().to_string())
        .filter(|line| !line.is_empty() && !line.ends_with(':') && !line.starts_with("```"))
        .take(max)
        .collect();
    if variants.is_empty() {
        ParseOutcome::ParseFailed
    } else {
        ParseOutcome::Parsed(variants)
    }
}

pub fn hyde_prompt(query: &str, doc_language: Language, max_words: usize) -> String {
    format!(
        "Write a short hypothetical passage, in {}, that could appear in a document and \
         would directly answer the question below. At most {} words. Output only the passage.\n\n\
         Question: {}",
        language_name(doc_language),
        max_words,
        query
    )
}

/// Keep at most `max_words` whitespace-separated words.
pub fn cap_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trim, drop empties and exact duplicates, keep first occurrence order.
pub fn dedupe_keep_order<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let s = item.as_ref().trim();
        if !s.is_empty() && seen.insert(s.to_string()) {
            out.push(s.to_string());
        }
    }
    out
}

fn strip_quotes(s: &str) -> &str {
    let quotes: &[char] = &['"', '\'', '“', '”', '「', '」'];
    s.trim_matches(quotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants_strips_markers() {
        let reply = "Here are some phrasings:\n1. how do airships float\n- What keeps a zeppelin aloft?\n\n* \"lifting gas buoyancy\"\n";
        assert_eq!(
            parse_variants(reply, 8),
            ParseOutcome::Parsed(vec![
                "how do airships float".to_string(),
                "What keeps a zeppelin aloft?".to_string(),
                "lifting gas buoyancy".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_variants_respects_max() {
        match parse_variants("a\nb\nc\nd", 2) {
            ParseOutcome::Parsed(v) => assert_eq!(v, vec!["a", "b"]),
            ParseOutcome::ParseFailed => panic!("expected variants"),
        }
    }

    #[test]
    fn test_parse_variants_failure() {
        assert_eq!(parse_variants("", 6), ParseOutcome::ParseFailed);
        assert_eq!(parse_variants("  \n - \n", 6), ParseOutcome::ParseFailed);
        assert_eq!(parse_variants("Variants:", 6), ParseOutcome::ParseFailed);
    }

    #[test]
    fn test_clean_translation() {
        assert_eq!(
            clean_translation("  \"飞艇 如何\n 漂浮\" ").as_deref(),
            Some("飞艇 如何 漂浮")
        );
        assert_eq!(clean_translation("Translation: hello").as_deref(), Some("hello"));
        assert_eq!(clean_translation("  \n "), None);
    }

    #[test]
    fn test_cap_words() {
        assert_eq!(cap_words("one two  three\nfour", 3), "one two three");
        assert_eq!(cap_words("short", 10), "short");
    }

    #[test]
    fn test_dedupe_keep_order() {
        assert_eq!(
            dedupe_keep_order(["a", " b ", "a", "", "b", "c"]),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_prompts_name_document_language() {
        assert!(translation_prompt("q", Language::Zh).contains("Chinese"));
        assert!(expansion_prompt("q", Language::En, 4).contains("4 alternative phrasings"));
        assert!(hyde_prompt("q", Language::En, 50).contains("At most 50 words"));
    }
}
