use crate::traits::KeywordIndex;
use crate::{IndexError, RetrievalMode, ScoredSegment, Segment};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tracing::debug;

// Smallest heap tantivy accepts for a single-threaded writer.
const WRITER_HEAP_BYTES: usize = 15_000_000;

/// BM25 full-text index over segment text, held in RAM for one session.
pub struct KeywordStore {
    index: Index,
    reader: IndexReader,
    text: Field,
    segment_id: Field,
    segments: RwLock<HashMap<String, Segment>>,
}

impl KeywordStore {
    pub fn new() -> Result<Self, IndexError> {
        let mut schema_builder = Schema::builder();
        let segment_id = schema_builder.add_text_field("segment_id", STRING | STORED);
        let text = schema_builder.add_text_field("text", TEXT);
        let index = Index::create_in_ram(schema_builder.build());

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            text,
            segment_id,
            segments: RwLock::new(HashMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> IndexError {
    IndexError::Poisoned("keyword store".to_string())
}

#[async_trait]
impl KeywordIndex for KeywordStore {
    async fn index_keywords(&self, segments: &[Segment]) -> Result<(), IndexError> {
        if segments.is_empty() {
            return Ok(());
        }

        let mut writer: IndexWriter = self
            .index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        for segment in segments {
            writer.add_document(doc!(
                self.segment_id => segment.segment_id.as_str(),
                self.text => segment.text.as_str(),
            ))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        let mut stored = self.segments.write().map_err(poisoned)?;
        for segment in segments {
            stored.insert(segment.segment_id.clone(), segment.clone());
        }
        Ok(())
    }

    async fn search_keyword(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredSegment>, IndexError> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Questions are free text, so syntax errors only drop the offending clause.
        let parser = QueryParser::for_index(&self.index, vec![self.text]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(query, errors = errors.len(), "lenient query parse");
        }

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(top_k))?;

        let stored = self.segments.read().map_err(poisoned)?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let found: TantivyDocument = searcher.doc(address)?;
            let Some(segment) = found
                .get_first(self.segment_id)
                .and_then(|value| value.as_str())
                .and_then(|id| stored.get(id))
            else {
                continue;
            };
            hits.push(ScoredSegment {
                segment: segment.clone(),
                score: f64::from(score),
                mode: RetrievalMode::Keyword,
            });
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SegmentMetadata, SourceMetadata};

    fn segment(index: u64, text: &str) -> Segment {
        Segment {
            segment_id: format!("seg-{index}"),
            text: text.to_string(),
            metadata: SegmentMetadata {
                source: SourceMetadata {
                    name: "report.pdf".to_string(),
                    page_count: 1,
                    converter: "test".to_string(),
                },
                header_path: "/".to_string(),
                segment_index: index,
                start: 0,
                end: text.len(),
            },
        }
    }

    async fn indexed() -> KeywordStore {
        let store = KeywordStore::new().unwrap();
        store
            .index_keywords(&[
                segment(0, "Headcount was flat across all regions."),
                segment(1, "Revenue grew 12% in Q1."),
                segment(2, "The office moved in Q3."),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = KeywordStore::new().unwrap();
        assert!(store.is_empty());
        assert!(store.search_keyword("revenue", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn matching_terms_rank_first() {
        let store = indexed().await;
        assert_eq!(store.len(), 3);

        let hits = store
            .search_keyword("What happened to revenue in Q1?", 5)
            .await
            .unwrap();

        assert_eq!(hits[0].segment.segment_id, "seg-1");
        assert_eq!(hits[0].mode, RetrievalMode::Keyword);
        assert!(hits.iter().all(|hit| hit.segment.segment_id != "seg-0"));
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn query_syntax_in_questions_does_not_fail() {
        let store = indexed().await;

        let hits = store.search_keyword("revenue: (Q1 AND", 5).await;

        assert!(hits.is_ok());
    }

    #[tokio::test]
    async fn top_k_limits_results() {
        let store = indexed().await;
        assert_eq!(store.search_keyword("in", 1).await.unwrap().len(), 1);
        assert!(store.search_keyword("in", 0).await.unwrap().is_empty());
    }
}
