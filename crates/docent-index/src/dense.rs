//! Exact inner-product search over L2-normalized embeddings.

use ndarray::{s, Array1, Array2, ArrayView1, Axis};

use docent_core::{Error, Result};

/// Normalized embeddings, shape (N, dim). Row i belongs to chunk i.
pub struct DenseIndex {
    matrix: Array2<f32>,
}

impl DenseIndex {
    /// Stack and normalize. Every vector must share the same non-zero dimension.
    pub fn build(embeddings: &[Vec<f32>]) -> Result<Self> {
        let Some(first) = embeddings.first() else {
            return Err(Error::IndexBuild("no embeddings supplied".into()));
        };
        let dim = first.len();
        if dim == 0 {
            return Err(Error::IndexBuild("embedding dimension is zero".into()));
        }

        let mut matrix = Array2::zeros((embeddings.len(), dim));
        for (i, emb) in embeddings.iter().enumerate() {
            if emb.len() != dim {
                return Err(Error::IndexBuild(format!(
                    "embedding {} has dimension {}, expected {}",
                    i,
                    emb.len(),
                    dim
                )));
            }
            if emb.iter().any(|v| !v.is_finite()) {
                return Err(Error::IndexBuild(format!("embedding {} has non-finite values", i)));
            }
            matrix.row_mut(i).assign(&ArrayView1::from(emb.as_slice()));
        }

        // Normalize rows for cosine similarity via dot product
        for mut row in matrix.rows_mut() {
            let norm = row.dot(&row).sqrt();
            if norm > 1e-9 {
                row /= norm;
            }
        }

        Ok(Self { matrix })
    }

    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn len(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.nrows() == 0
    }

    /// Whether `search_dim` selects a strict prefix of the stored vectors.
    pub fn truncates(&self, search_dim: usize) -> bool {
        search_dim > 0 && search_dim < self.dim()
    }

    /// Cosine similarity of every row with `query`, in [-1, 1].
    ///
    /// With a truncating `search_dim`, both sides are cut to their first
    /// `search_dim` components and re-normalized before comparison.
    pub fn similarities(&self, query: &[f32], search_dim: usize) -> Result<Array1<f32>> {
        if query.len() != self.dim() {
            return Err(Error::InvalidQuery(format!(
                "query embedding has dimension {}, index expects {}",
                query.len(),
                self.dim()
            )));
        }

        let dim = if self.truncates(search_dim) { search_dim } else { self.dim() };
        let q = ArrayView1::from(&query[..dim]);
        let q_norm = q.dot(&q).sqrt();
        if q_norm < 1e-9 {
            return Ok(Array1::zeros(self.len()));
        }
        let q = &q / q_norm;

        if dim == self.dim() {
            return Ok(self.matrix.dot(&q));
        }

        let docs = self.matrix.slice(s![.., ..dim]);
        let raw = docs.dot(&q);
        let norms = docs.map_axis(Axis(1), |row| row.dot(&row).sqrt());
        Ok(ndarray::Zip::from(&raw)
            .and(&norms)
            .map_collect(|&dot, &norm| if norm > 1e-9 { dot / norm } else { 0.0 }))
    }

    /// Indices of the `n` most similar rows, descending, ties by row order.
    pub fn top_n(similarities: &Array1<f32>, n: usize) -> Vec<(usize, f32)> {
        let mut indexed: Vec<(usize, f32)> = similarities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        indexed.truncate(n);
        indexed
    }
}

/// Map a cosine in [-1, 1] onto [0, 1].
pub fn rescale_cosine(cos: f32) -> f64 {
    ((cos as f64 + 1.0) * 0.5).clamp(0.0, 1.0)
}

/// Cosine similarity of two raw (unnormalized) vectors; 0 when either is degenerate.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    a.dot(&b) / denom
}
