//! Embedding collaborator contract.

use futures::future::BoxFuture;

use docent_core::{Error, Result};

/// Produces dense vectors for text.
///
/// Implementations must return exactly one vector per input, all of the same
/// dimension. `instruction_hint` describes the retrieval task for
/// instruction-aware models; backends that do not support it may ignore it.
pub trait Embedder: Send + Sync {
    fn embed(
        &self,
        texts: Vec<String>,
        instruction_hint: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;
}

/// Render a query in the instruction-aware input format.
pub fn render_instruction(hint: Option<&str>, text: &str) -> String {
    match hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hint) => format!("Instruct: {}\nQuery:{}", hint, text),
        None => text.to_string(),
    }
}

/// Check an embedding batch against the number of inputs sent.
pub fn check_batch(expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::Collaborator(format!(
            "embedder returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(first) = vectors.first() {
        let dim = first.len();
        if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
            return Err(Error::Collaborator("embedder returned inconsistent dimensions".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_instruction() {
        assert_eq!(
            render_instruction(Some("find passages"), "what is rust"),
            "Instruct: find passages\nQuery:what is rust"
        );
        assert_eq!(render_instruction(None, "plain"), "plain");
        assert_eq!(render_instruction(Some("  "), "plain"), "plain");
    }

    #[test]
    fn test_check_batch() {
        assert!(check_batch(2, &[vec![1.0, 0.0], vec![0.0, 1.0]]).is_ok());
        assert!(check_batch(3, &[vec![1.0]]).is_err());
        assert!(check_batch(2, &[vec![1.0, 0.0], vec![1.0]]).is_err());
        assert!(check_batch(0, &[]).is_ok());
    }
}
