//! Dominant-language detection and language-aware tokenization.
//!
//! Detection is a CJK-density heuristic. Latin-script text is split on word
//! boundaries; Chinese text is segmented into dictionary words by jieba.

use jieba_rs::Jieba;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Minimum CJK count before a document is considered Chinese.
pub const DOCUMENT_MIN_CJK: usize = 10;
/// Queries are short, so a single CJK character can decide.
pub const QUERY_MIN_CJK: usize = 0;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());
static JIEBA: Lazy<Jieba> = Lazy::new(Jieba::new);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Zh,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Zh => "zh",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Chinese if CJK characters outnumber both `min_cjk` and the Latin letters.
pub fn detect_language(text: &str, min_cjk: usize) -> Language {
    let mut cjk = 0usize;
    let mut latin = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else if c.is_ascii_alphabetic() {
            latin += 1;
        }
    }
    if cjk > min_cjk.max(latin) {
        Language::Zh
    } else {
        Language::En
    }
}

/// Tokenize `text` for lexical indexing in the given language.
pub fn tokenize(text: &str, language: Language) -> Vec<String> {
    match language {
        Language::En => WORD_RE
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect(),
        Language::Zh => JIEBA
            .cut(text, true)
            .into_iter()
            .map(str::trim)
            .filter(|word| word.chars().any(char::is_alphanumeric))
            .map(str::to_lowercase)
            .collect(),
    }
}
