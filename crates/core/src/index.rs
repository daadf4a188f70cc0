use crate::embeddings::Embedder;
use crate::retriever::HybridRetriever;
use crate::traits::{KeywordIndex, VectorIndex};
use crate::{IndexEntry, IndexError, ScoredSegment, Segment};
use std::sync::Arc;
use tracing::{debug, info};

/// A built, read-only index. Cheap to clone.
#[derive(Clone)]
pub struct IndexHandle {
    retriever: Arc<HybridRetriever>,
    entry_count: usize,
    dimensions: usize,
}

impl IndexHandle {
    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn is_hybrid(&self) -> bool {
        self.retriever.is_hybrid()
    }

    /// Up to `top_k` segments, highest score first. An empty index yields an
    /// empty result.
    pub async fn search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredSegment>, IndexError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        self.retriever.search(query_vector, query_text, top_k).await
    }

    pub async fn release(&self) -> Result<(), IndexError> {
        self.retriever.vector_index().release().await
    }
}

pub struct IndexBuilder {
    vector: Arc<dyn VectorIndex>,
    keyword: Option<Arc<dyn KeywordIndex>>,
    alpha: f64,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(vector: Arc<dyn VectorIndex>) -> Self {
        Self {
            vector,
            keyword: None,
            alpha: 1.0,
            batch_size: 20,
        }
    }

    pub fn hybrid(mut self, keyword: Arc<dyn KeywordIndex>, alpha: f64) -> Self {
        self.keyword = Some(keyword);
        self.alpha = alpha;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Embeds every segment and stores it. Any embedding failure aborts the
    /// build; nothing is retried.
    pub async fn build(
        self,
        segments: &[Segment],
        embedder: &dyn Embedder,
    ) -> Result<IndexHandle, IndexError> {
        let mut entry_count = 0;

        for batch in segments.chunks(self.batch_size) {
            let texts = batch
                .iter()
                .map(|segment| segment.text.clone())
                .collect::<Vec<_>>();
            let vectors = embedder.embed_batch(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(IndexError::Request(format!(
                    "embedding count {} doesn't match segment count {}",
                    vectors.len(),
                    batch.len()
                )));
            }

            let entries = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(segment, vector)| IndexEntry { segment, vector })
                .collect::<Vec<_>>();

            self.vector.index_vectors(&entries).await?;
            if let Some(keyword) = &self.keyword {
                keyword.index_keywords(batch).await?;
            }

            entry_count += entries.len();
            debug!(indexed = entry_count, total = segments.len(), "indexed batch");
        }

        let mut retriever = HybridRetriever::new(self.vector);
        if let Some(keyword) = self.keyword {
            retriever = retriever.with_keyword(keyword, self.alpha);
        }

        info!(
            entries = entry_count,
            model = embedder.model_name(),
            hybrid = retriever.is_hybrid(),
            "index built"
        );

        Ok(IndexHandle {
            retriever: Arc::new(retriever),
            entry_count,
            dimensions: embedder.dimensions(),
        })
    }
}
