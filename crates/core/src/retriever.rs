use crate::traits::{KeywordIndex, VectorIndex};
use crate::{IndexError, RetrievalMode, ScoredSegment, Segment};
use std::collections::HashMap;
use std::sync::Arc;

const RRF_K: f64 = 60.0;

/// Fuses dense and lexical rankings with weighted reciprocal-rank fusion.
/// Without a keyword index it is a plain vector search.
pub struct HybridRetriever {
    vector: Arc<dyn VectorIndex>,
    keyword: Option<Arc<dyn KeywordIndex>>,
    alpha: f64,
}

impl HybridRetriever {
    pub fn new(vector: Arc<dyn VectorIndex>) -> Self {
        Self {
            vector,
            keyword: None,
            alpha: 1.0,
        }
    }

    pub fn with_keyword(mut self, keyword: Arc<dyn KeywordIndex>, alpha: f64) -> Self {
        self.keyword = Some(keyword);
        self.alpha = alpha.clamp(0.0, 1.0);
        self
    }

    pub fn is_hybrid(&self) -> bool {
        self.keyword.is_some()
    }

    pub fn vector_index(&self) -> &Arc<dyn VectorIndex> {
        &self.vector
    }

    pub fn keyword_index(&self) -> Option<&Arc<dyn KeywordIndex>> {
        self.keyword.as_ref()
    }

    pub async fn search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredSegment>, IndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let Some(keyword) = &self.keyword else {
            return self.vector.search_vector(query_vector, top_k).await;
        };

        // Over-fetch so fusion has overlap to work with.
        let fetch = top_k.saturating_mul(4).max(top_k);
        let (vector_hits, keyword_hits) = tokio::try_join!(
            self.vector.search_vector(query_vector, fetch),
            keyword.search_keyword(query_text, fetch)
        )?;

        let mut fused = HashMap::<String, FusedHit>::new();
        apply_rrf(&mut fused, &vector_hits, self.alpha);
        apply_rrf(&mut fused, &keyword_hits, 1.0 - self.alpha);

        let mut ranked = fused.into_values().collect::<Vec<_>>();
        ranked.sort_by(|left, right| {
            right
                .total_score
                .total_cmp(&left.total_score)
                .then_with(|| {
                    left.segment
                        .metadata
                        .segment_index
                        .cmp(&right.segment.metadata.segment_index)
                })
        });

        Ok(ranked
            .into_iter()
            .take(top_k)
            .map(|hit| ScoredSegment {
                segment: hit.segment,
                score: hit.total_score,
                mode: dominant_mode(&hit.modes),
            })
            .collect())
    }
}

#[derive(Debug)]
struct FusedHit {
    segment: Segment,
    total_score: f64,
    modes: Vec<RetrievalMode>,
}

fn apply_rrf(target: &mut HashMap<String, FusedHit>, hits: &[ScoredSegment], weight: f64) {
    for (position, hit) in hits.iter().enumerate() {
        let rank_component = 1.0 / (RRF_K + (position as f64 + 1.0));

        let entry = target
            .entry(hit.segment.segment_id.clone())
            .or_insert_with(|| FusedHit {
                segment: hit.segment.clone(),
                total_score: 0.0,
                modes: Vec::new(),
            });

        entry.total_score += weight * rank_component;
        if !entry.modes.contains(&hit.mode) {
            entry.modes.push(hit.mode);
        }
    }
}

fn dominant_mode(modes: &[RetrievalMode]) -> RetrievalMode {
    let vector = modes.contains(&RetrievalMode::Vector);
    let keyword = modes.contains(&RetrievalMode::Keyword);
    match (vector, keyword) {
        (true, true) => RetrievalMode::Hybrid,
        (false, true) => RetrievalMode::Keyword,
        _ => RetrievalMode::Vector,
    }
}
