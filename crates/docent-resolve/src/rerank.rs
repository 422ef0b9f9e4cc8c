//! LLM yes/no relevance judging with a stable partition.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::warn;

use docent_infer::{CompletionMode, LanguageModel};

/// Judge outcome for one passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Yes,
    No,
    /// The judge failed or replied with something unparseable; kept as relevant.
    DefaultedYes,
}

impl Verdict {
    pub fn is_relevant(&self) -> bool {
        !matches!(self, Self::No)
    }
}

pub fn judge_prompt(query: &str, passage: &str, max_chars: usize) -> String {
    format!(
        "Decide whether the passage helps answer the question.\n\n\
         Question: {}\n\nPassage:\n{}\n\nAnswer yes or no.",
        query,
        truncate_chars(passage.trim(), max_chars)
    )
}

/// `Some(true)` for yes, `Some(false)` for no, `None` if the reply is neither.
pub fn parse_judgement(reply: &str) -> Option<bool> {
    let word: String = reply
        .trim()
        .chars()
        .take_while(|c| c.is_alphanumeric() || ('\u{4e00}'..='\u{9fff}').contains(c))
        .collect::<String>()
        .to_lowercase();
    match word.as_str() {
        "yes" | "y" | "true" | "relevant" | "是" | "相关" => Some(true),
        "no" | "n" | "false" | "irrelevant" | "否" | "不相关" | "不" => Some(false),
        _ => None,
    }
}

/// Judge every passage independently, at most `concurrency` in flight.
/// Verdicts come back in passage order.
pub async fn judge_all(
    llm: &dyn LanguageModel,
    query: &str,
    passages: &[&str],
    max_chars: usize,
    concurrency: usize,
) -> Vec<Verdict> {
    stream::iter(passages.iter().map(|passage| {
        let prompt = judge_prompt(query, passage, max_chars);
        async move {
            match llm.complete(prompt, CompletionMode::Simple).await {
                Ok(reply) => match parse_judgement(&reply) {
                    Some(true) => Verdict::Yes,
                    Some(false) => Verdict::No,
                    None => {
                        warn!("Unparseable rerank reply {:?}; keeping passage", reply);
                        Verdict::DefaultedYes
                    }
                },
                Err(e) => {
                    warn!("Rerank judge failed: {}; keeping passage", e);
                    Verdict::DefaultedYes
                }
            }
        }
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await
}

/// Relevant items first, then the rest, each group in its original order.
pub fn stable_partition<T>(items: Vec<T>, verdicts: &[Verdict]) -> Vec<T> {
    let (mut yes, mut no) = (Vec::new(), Vec::new());
    for (i, item) in items.into_iter().enumerate() {
        if verdicts.get(i).map_or(true, Verdict::is_relevant) {
            yes.push(item);
        } else {
            no.push(item);
        }
    }
    yes.append(&mut no);
    yes
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_infer::ScriptedModel;

    #[test]
    fn test_parse_judgement() {
        assert_eq!(parse_judgement("Yes."), Some(true));
        assert_eq!(parse_judgement("  no, it does not"), Some(false));
        assert_eq!(parse_judgement("是的"), None);
        assert_eq!(parse_judgement("是"), Some(true));
        assert_eq!(parse_judgement("maybe"), None);
        assert_eq!(parse_judgement(""), None);
    }

    #[test]
    fn test_stable_partition() {
        let verdicts = [Verdict::No, Verdict::Yes, Verdict::DefaultedYes, Verdict::No, Verdict::Yes];
        let out = stable_partition(vec!["a", "b", "c", "d", "e"], &verdicts);
        assert_eq!(out, vec!["b", "c", "e", "a", "d"]);
    }

    #[test]
    fn test_prompt_truncates_passage() {
        let prompt = judge_prompt("q", &"x".repeat(50), 10);
        assert!(prompt.contains(&format!("{}…", "x".repeat(9))));
        assert!(!prompt.contains(&"x".repeat(10)));
    }

    #[tokio::test]
    async fn test_failures_default_to_yes() {
        let model = ScriptedModel::new()
            .on("Passage:\nbad", "no")
            .on("Passage:\ngood", "yes")
            .on("Passage:\nodd", "perhaps");
        let verdicts = judge_all(&model, "q", &["good", "bad", "odd", "unscripted"], 100, 2).await;
        assert_eq!(
            verdicts,
            vec![Verdict::Yes, Verdict::No, Verdict::DefaultedYes, Verdict::DefaultedYes]
        );
        assert_eq!(model.call_count(), 4);
    }
}
