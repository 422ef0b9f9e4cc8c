//! In-memory Okapi BM25 over pre-tokenized chunks.

use std::collections::HashMap;

use docent_core::{Error, Result};

/// BM25 free parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    /// Floor for negative IDFs, as a fraction of the mean IDF.
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// Term-frequency ranking structure built once over a fixed corpus.
pub struct Bm25Index {
    params: Bm25Params,
    doc_freqs: Vec<HashMap<String, u32>>,
    doc_len: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    /// Build from one token list per document.
    pub fn build(corpus: &[Vec<String>], params: Bm25Params) -> Result<Self> {
        if corpus.is_empty() {
            return Err(Error::IndexBuild("lexical corpus is empty".into()));
        }

        let mut doc_freqs = Vec::with_capacity(corpus.len());
        let mut doc_len = Vec::with_capacity(corpus.len());
        let mut containing: HashMap<String, u32> = HashMap::new();
        let mut total_len = 0usize;

        for tokens in corpus {
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *containing.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += tokens.len();
            doc_len.push(tokens.len());
            doc_freqs.push(freqs);
        }

        let n_docs = corpus.len() as f64;
        let avgdl = total_len as f64 / n_docs;

        let mut idf = HashMap::with_capacity(containing.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, n) in containing {
            let n = n as f64;
            let value = (n_docs - n + 0.5).ln() - (n + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }
        if !idf.is_empty() {
            let floor = params.epsilon * (idf_sum / idf.len() as f64);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Ok(Self {
            params,
            doc_freqs,
            doc_len,
            avgdl,
            idf,
        })
    }

    pub fn len(&self) -> usize {
        self.doc_len.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_len.is_empty()
    }

    /// Raw BM25 score of every document for the given query tokens.
    pub fn scores(&self, query: &[String]) -> Vec<f64> {
        let Bm25Params { k1, b, .. } = self.params;
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };

        let mut scores = vec![0.0; self.len()];
        for term in query {
            let Some(&idf) = self.idf.get(term) else {
                continue;
            };
            for (i, freqs) in self.doc_freqs.iter().enumerate() {
                let Some(&tf) = freqs.get(term) else {
                    continue;
                };
                let tf = tf as f64;
                let norm = 1.0 - b + b * self.doc_len[i] as f64 / avgdl;
                scores[i] += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }
        scores
    }

    /// Best `n` documents with a positive score, descending, ties by document order.
    pub fn top_n(&self, query: &[String], n: usize) -> Vec<(usize, f64)> {
        let mut hits: Vec<(usize, f64)> = self
            .scores(query)
            .into_iter()
            .enumerate()
            .filter(|&(_, s)| s > 0.0)
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(n);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn corpus() -> Vec<Vec<String>> {
        vec![
            toks("rust is a systems programming language"),
            toks("python is great for data science"),
            toks("the borrow checker keeps rust memory safe"),
            toks("gardening tips for spring"),
            toks("a recipe for sourdough bread"),
            toks("notes on medieval history"),
        ]
    }

    #[test]
    fn test_empty_corpus_fails() {
        assert!(matches!(
            Bm25Index::build(&[], Bm25Params::default()),
            Err(Error::IndexBuild(_))
        ));
    }

    #[test]
    fn test_matching_docs_score_positive() {
        let index = Bm25Index::build(&corpus(), Bm25Params::default()).unwrap();
        let scores = index.scores(&toks("rust"));
        assert!(scores[0] > 0.0);
        assert!(scores[2] > 0.0);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[3], 0.0);
        assert_eq!(scores.len(), 6);
    }

    #[test]
    fn test_top_n_skips_non_matching() {
        let index = Bm25Index::build(&corpus(), Bm25Params::default()).unwrap();
        let hits = index.top_n(&toks("borrow checker"), 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 2);
    }

    #[test]
    fn test_rarer_term_weighs_more() {
        let index = Bm25Index::build(&corpus(), Bm25Params::default()).unwrap();
        // "is" appears in two of six docs, "science" in one.
        let common = index.scores(&toks("is"))[1];
        let rare = index.scores(&toks("science"))[1];
        assert!(rare > common);
    }

    #[test]
    fn test_unknown_terms_score_zero() {
        let index = Bm25Index::build(&corpus(), Bm25Params::default()).unwrap();
        assert!(index.top_n(&toks("quantum"), 5).is_empty());
        assert!(index.top_n(&[], 5).is_empty());
    }

    #[test]
    fn test_all_empty_documents() {
        let index = Bm25Index::build(&[vec![], vec![]], Bm25Params::default()).unwrap();
        assert_eq!(index.scores(&toks("anything")), vec![0.0, 0.0]);
    }
}
