use crate::models::{SegmentMetadata, SourceMetadata};
use crate::traits::VectorIndex;
use crate::{IndexEntry, IndexError, RetrievalMode, ScoredSegment, Segment};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointPayload {
    segment_id: String,
    text: String,
    source_name: String,
    page_count: u32,
    converter: String,
    header_path: String,
    segment_index: u64,
    start: usize,
    end: usize,
}

impl From<&Segment> for PointPayload {
    fn from(segment: &Segment) -> Self {
        Self {
            segment_id: segment.segment_id.clone(),
            text: segment.text.clone(),
            source_name: segment.metadata.source.name.clone(),
            page_count: segment.metadata.source.page_count,
            converter: segment.metadata.source.converter.clone(),
            header_path: segment.metadata.header_path.clone(),
            segment_index: segment.metadata.segment_index,
            start: segment.metadata.start,
            end: segment.metadata.end,
        }
    }
}

impl From<PointPayload> for Segment {
    fn from(payload: PointPayload) -> Self {
        Segment {
            segment_id: payload.segment_id,
            text: payload.text,
            metadata: SegmentMetadata {
                source: SourceMetadata {
                    name: payload.source_name,
                    page_count: payload.page_count,
                    converter: payload.converter,
                },
                header_path: payload.header_path,
                segment_index: payload.segment_index,
                start: payload.start,
                end: payload.end,
            },
        }
    }
}

/// Dense vector collection on a Qdrant server, one per session.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    batch_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
            batch_size: batch_size.max(1),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            return Ok(());
        }

        Err(IndexError::BackendResponse {
            backend: "qdrant".to_string(),
            details: format!(
                "collection {} setup failed with {}",
                self.collection,
                response.status()
            ),
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn index_vectors(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        let points = entries
            .iter()
            .map(|entry| {
                if entry.vector.len() != self.vector_size {
                    return Err(IndexError::Request(format!(
                        "embedding dimension {} != {}",
                        entry.vector.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": entry.segment.metadata.segment_index,
                    "vector": entry.vector,
                    "payload": serde_json::to_value(PointPayload::from(&entry.segment))?,
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        for batch in points.chunks(self.batch_size) {
            let response = self
                .client
                .put(format!("{}/points?wait=true", self.collection_url()))
                .json(&json!({ "points": batch }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(IndexError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: response.status().to_string(),
                });
            }
            debug!(collection = %self.collection, points = batch.len(), "upserted batch");
        }

        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredSegment>, IndexError> {
        if query_vector.len() != self.vector_size {
            return Err(IndexError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_search_hits(&parsed)
    }

    async fn release(&self) -> Result<(), IndexError> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(IndexError::BackendResponse {
            backend: "qdrant".to_string(),
            details: response.status().to_string(),
        })
    }
}

fn parse_search_hits(parsed: &Value) -> Result<Vec<ScoredSegment>, IndexError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
        let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
        let payload: PointPayload = serde_json::from_value(payload)?;

        result.push(ScoredSegment {
            segment: payload.into(),
            score,
            mode: RetrievalMode::Vector,
        });
    }

    result.sort_by(|left, right| right.score.total_cmp(&left.score));
    Ok(result)
}
