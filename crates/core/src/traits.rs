use crate::{IndexEntry, IndexError, ScoredSegment, Segment};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn index_vectors(&self, entries: &[IndexEntry]) -> Result<(), IndexError>;

    /// Nearest entries to `query_vector`, best first, at most `top_k`.
    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredSegment>, IndexError>;

    /// Frees backend resources held for this index.
    async fn release(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn index_keywords(&self, segments: &[Segment]) -> Result<(), IndexError>;

    async fn search_keyword(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredSegment>, IndexError>;
}
