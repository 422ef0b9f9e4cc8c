//! Deterministic collaborators for offline runs and tests.
//!
//! [`KeywordEmbedder`] maps text onto a fixed keyword vocabulary;
//! [`ScriptedModel`] answers prompts from substring rules. Neither touches
//! the network, so whole retrieval turns can be replayed exactly.

use futures::future::BoxFuture;
use parking_lot::Mutex;

use docent_core::{Error, Result};

use crate::embedder::Embedder;
use crate::llm::{CompletionMode, LanguageModel};

/// Bag-of-keywords embedder. Dimension is the vocabulary size plus one
/// constant component, so no text maps to the zero vector.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
}

impl KeywordEmbedder {
    pub fn new<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vocabulary: vocabulary
                .into_iter()
                .map(|w| w.into().to_lowercase())
                .collect(),
        }
    }

    pub fn dim(&self) -> usize {
        self.vocabulary.len() + 1
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|w| lower.matches(w.as_str()).count() as f32)
            .collect();
        v.push(0.1);
        v
    }
}

impl Embedder for KeywordEmbedder {
    fn embed(
        &self,
        texts: Vec<String>,
        _instruction_hint: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let vectors = texts.iter().map(|t| self.vector(t)).collect();
        Box::pin(async move { Ok(vectors) })
    }
}

struct Rule {
    needle: String,
    mode: Option<CompletionMode>,
    reply: Result<String>,
}

/// Language model answering from an ordered list of substring rules.
///
/// The first rule whose needle occurs in the prompt (and whose mode matches,
/// if one was given) decides the reply. Prompts matching no rule fail with a
/// collaborator error. Every call is recorded.
#[derive(Default)]
pub struct ScriptedModel {
    rules: Vec<Rule>,
    calls: Mutex<Vec<(CompletionMode, String)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `reply` to prompts containing `needle`.
    pub fn on(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            mode: None,
            reply: Ok(reply.into()),
        });
        self
    }

    /// Like [`ScriptedModel::on`], restricted to one completion mode.
    pub fn on_mode(
        mut self,
        mode: CompletionMode,
        needle: impl Into<String>,
        reply: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            mode: Some(mode),
            reply: Ok(reply.into()),
        });
        self
    }

    /// Fail prompts containing `needle` with a transient collaborator error.
    pub fn fail_on(mut self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.rules.push(Rule {
            reply: Err(Error::Collaborator(format!("scripted failure for '{}'", needle))),
            needle,
            mode: None,
        });
        self
    }

    pub fn calls(&self) -> Vec<(CompletionMode, String)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn reply(&self, prompt: &str, mode: CompletionMode) -> Result<String> {
        let rule = self
            .rules
            .iter()
            .find(|r| prompt.contains(&r.needle) && r.mode.map_or(true, |m| m == mode));
        match rule {
            Some(Rule { reply: Ok(text), .. }) => Ok(text.clone()),
            Some(Rule { reply: Err(e), .. }) => Err(Error::Collaborator(e.to_string())),
            None => Err(Error::Collaborator("no scripted reply for prompt".into())),
        }
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, prompt: String, mode: CompletionMode) -> BoxFuture<'_, Result<String>> {
        let reply = self.reply(&prompt, mode);
        self.calls.lock().push((mode, prompt));
        Box::pin(async move { reply })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keyword_embedder_counts_terms() {
        let embedder = KeywordEmbedder::new(["zeppelin", "rain"]);
        let vectors = embedder
            .embed(vec!["Zeppelin over zeppelin".into(), "dry".into()], None)
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![2.0, 0.0, 0.1]);
        assert_eq!(vectors[1], vec![0.0, 0.0, 0.1]);
        assert_eq!(embedder.dim(), 3);
    }

    #[tokio::test]
    async fn test_scripted_model_first_match_wins() {
        let model = ScriptedModel::new()
            .fail_on("broken")
            .on_mode(CompletionMode::Complex, "expand", "a\nb")
            .on("expand", "simple reply");

        assert_eq!(
            model.complete("please expand".into(), CompletionMode::Complex).await.unwrap(),
            "a\nb"
        );
        assert_eq!(
            model.complete("please expand".into(), CompletionMode::Simple).await.unwrap(),
            "simple reply"
        );
        assert!(model.complete("broken expand".into(), CompletionMode::Simple).await.is_err());
        assert!(model.complete("unmatched".into(), CompletionMode::Simple).await.is_err());
        assert_eq!(model.call_count(), 4);
    }
}
