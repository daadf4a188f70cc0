//! In-process vector store. Brute-force cosine similarity over entries held
//! behind `std::sync::RwLock`.

use crate::traits::VectorIndex;
use crate::{IndexEntry, IndexError, RetrievalMode, ScoredSegment};
use async_trait::async_trait;
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    vectors: RwLock<Vec<IndexEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> IndexError {
    IndexError::Poisoned("memory store".to_string())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryStore {
    async fn index_vectors(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        let mut stored = self.vectors.write().map_err(poisoned)?;
        stored.extend(entries.iter().cloned());
        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredSegment>, IndexError> {
        let stored = self.vectors.read().map_err(poisoned)?;

        let mut scored = stored
            .iter()
            .map(|entry| ScoredSegment {
                segment: entry.segment.clone(),
                score: cosine_similarity(query_vector, &entry.vector) as f64,
                mode: RetrievalMode::Vector,
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn release(&self) -> Result<(), IndexError> {
        self.vectors.write().map_err(poisoned)?.clear();
        Ok(())
    }
}
