use crate::embed::Embedder;
use crate::error::PipelineError;
use crate::models::Passage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};

/// One embedded passage with the metadata needed to render a search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub page_id: String,
    pub title: String,
    pub url: String,
    pub seq: usize,
    pub start: usize,
    pub end: usize,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// In-memory vector index. All vectors share one dimension, established by
/// the first merged batch; the only mutation path is [`VectorStore::merge`],
/// and reads never mutate, so concurrent searches are safe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStore {
    dimension: Option<usize>,
    records: Vec<VectorRecord>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a partial store from a batch, validating that every record
    /// shares one embedding dimension.
    pub fn from_records(records: Vec<VectorRecord>) -> Result<Self, PipelineError> {
        let mut dimension = None;
        for record in &records {
            match dimension {
                None => dimension = Some(record.embedding.len()),
                Some(expected) if expected == record.embedding.len() => {}
                Some(expected) => {
                    return Err(PipelineError::DimensionMismatch {
                        expected,
                        actual: record.embedding.len(),
                    })
                }
            }
        }
        Ok(Self { dimension, records })
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }

    /// Folds a partial store into this accumulator.
    ///
    /// A dimension disagreement rejects the whole batch and leaves the
    /// accumulator exactly as it was; there is no partial application.
    pub fn merge(&mut self, other: VectorStore) -> Result<(), PipelineError> {
        let Some(incoming) = other.dimension else {
            return Ok(());
        };

        match self.dimension {
            None => self.dimension = Some(incoming),
            Some(expected) if expected == incoming => {}
            Some(expected) => {
                return Err(PipelineError::DimensionMismatch {
                    expected,
                    actual: incoming,
                })
            }
        }

        self.records.extend(other.records);
        Ok(())
    }

    /// Nearest-neighbor query by inner product.
    ///
    /// Returns up to `k` results in descending score order; ties keep
    /// insertion order. A threshold filters the retrieved `k` candidates, it
    /// does not shrink the retrieval itself.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<(&VectorRecord, f32)>, PipelineError> {
        if let Some(dimension) = self.dimension {
            if query.len() != dimension {
                return Err(PipelineError::DimensionMismatch {
                    expected: dimension,
                    actual: query.len(),
                });
            }
        }

        let mut scored: Vec<(&VectorRecord, f32)> = self
            .records
            .iter()
            .map(|record| (record, dot(query, &record.embedding)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        if let Some(threshold) = score_threshold {
            scored.retain(|(_, score)| *score >= threshold);
        }

        Ok(scored)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Embeds passages in fixed-size batches and folds each batch into a single
/// accumulator index. Batch size bounds peak memory; the embedder is free to
/// parallelize internally across one batch.
pub fn build_store(
    passages: &[Passage],
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<VectorStore, PipelineError> {
    let batch_size = batch_size.max(1);
    let mut store = VectorStore::new();

    for (batch_no, batch) in passages.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;

        let records = batch
            .iter()
            .zip(vectors)
            .map(|(p, embedding)| VectorRecord {
                id: p.passage_id(),
                page_id: p.page_id.clone(),
                title: p.title.clone(),
                url: p.url.clone(),
                seq: p.seq,
                start: p.start,
                end: p.end,
                content: p.content.clone(),
                embedding,
            })
            .collect();

        store.merge(VectorStore::from_records(records)?)?;
        debug!(batch = batch_no, indexed = store.len(), "Batch merged");
    }

    info!(
        passages = store.len(),
        dimension = store.dimension().unwrap_or(0),
        "Vector index built"
    );
    Ok(store)
}
