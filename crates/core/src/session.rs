use crate::chat::ChatEngine;
use crate::chunking::{split_markdown, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::extractor::DocumentIngestor;
use crate::index::{IndexBuilder, IndexHandle};
use crate::llm::LanguageModel;
use crate::stores::{KeywordStore, MemoryStore, QdrantStore};
use crate::traits::VectorIndex;
use crate::{
    ConversationTurn, ConversionError, Document, IndexError, NormalizedText, PipelineOptions,
    Segment, SessionError,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum StoreBackend {
    Memory,
    Qdrant {
        endpoint: String,
        collection_prefix: String,
    },
}

/// Everything needed to turn an upload into a chat engine. Shared by all
/// sessions; holds no per-session state.
pub struct Pipeline {
    ingestor: Arc<DocumentIngestor>,
    chunking: ChunkingConfig,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    backend: StoreBackend,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        ingestor: DocumentIngestor,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            ingestor: Arc::new(ingestor),
            chunking: ChunkingConfig::default(),
            embedder,
            llm,
            backend: StoreBackend::Memory,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_backend(mut self, backend: StoreBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn convert(&self, document: Document) -> Result<NormalizedText, ConversionError> {
        let ingestor = Arc::clone(&self.ingestor);
        tokio::task::spawn_blocking(move || ingestor.convert(&document))
            .await
            .map_err(|error| ConversionError::Worker(error.to_string()))?
    }

    pub fn split(&self, text: &NormalizedText) -> Vec<Segment> {
        split_markdown(text, self.chunking)
    }

    pub async fn build_index(
        &self,
        session_id: Uuid,
        segments: &[Segment],
    ) -> Result<IndexHandle, IndexError> {
        let vector: Arc<dyn VectorIndex> = match &self.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Qdrant {
                endpoint,
                collection_prefix,
            } => {
                let store = QdrantStore::new(
                    endpoint.clone(),
                    format!("{collection_prefix}_{}", session_id.simple()),
                    self.embedder.dimensions(),
                    self.options.batch_size,
                );
                store.ensure_collection().await?;
                Arc::new(store)
            }
        };

        self.index_into(vector, segments).await
    }

    /// Fills `vector` (plus an in-RAM keyword index in hybrid mode). On
    /// failure `vector` is released before the error is returned.
    pub async fn index_into(
        &self,
        vector: Arc<dyn VectorIndex>,
        segments: &[Segment],
    ) -> Result<IndexHandle, IndexError> {
        let result = self.fill(Arc::clone(&vector), segments).await;
        if result.is_err() {
            if let Err(release_error) = vector.release().await {
                warn!(error = %release_error, "failed to release partial index");
            }
        }
        result
    }

    async fn fill(
        &self,
        vector: Arc<dyn VectorIndex>,
        segments: &[Segment],
    ) -> Result<IndexHandle, IndexError> {
        let mut builder = IndexBuilder::new(vector).batch_size(self.options.batch_size);
        if self.options.hybrid {
            builder = builder.hybrid(Arc::new(KeywordStore::new()?), self.options.alpha);
        }
        builder.build(segments, self.embedder.as_ref()).await
    }

    pub async fn build_engine(
        &self,
        session_id: Uuid,
        document: Document,
    ) -> Result<(ChatEngine, usize), SessionError> {
        let file_name = document.file_name.clone();
        let text = self.convert(document).await?;
        let segments = self.split(&text);
        info!(
            session = %session_id,
            file = %file_name,
            chars = text.text.len(),
            segments = segments.len(),
            converter = %text.source.converter,
            "document converted"
        );

        let index = self.build_index(session_id, &segments).await?;
        let engine = ChatEngine::new(
            index,
            Arc::clone(&self.embedder),
            Arc::clone(&self.llm),
            &self.options,
        );
        Ok((engine, segments.len()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Indexed { document: String, segments: usize },
    /// A document is already loaded; the upload was ignored.
    AlreadyLoaded { document: String },
}

#[derive(Debug, Clone)]
pub enum QuestionOutcome {
    Answered(ConversationTurn),
    /// No document has been uploaded yet; nothing was asked.
    NoDocument,
    /// Blank input.
    Ignored,
}

/// Per-user context: at most one chat engine and the transcript.
pub struct Session {
    id: Uuid,
    pipeline: Arc<Pipeline>,
    engine: Option<ChatEngine>,
    document_name: Option<String>,
    history: Vec<ConversationTurn>,
    last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self::with_id(Uuid::new_v4(), pipeline)
    }

    pub fn with_id(id: Uuid, pipeline: Arc<Pipeline>) -> Self {
        Self {
            id,
            pipeline,
            engine: None,
            document_name: None,
            history: Vec::new(),
            last_active: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn has_document(&self) -> bool {
        self.engine.is_some()
    }

    pub fn document_name(&self) -> Option<&str> {
        self.document_name.as_deref()
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub async fn on_upload(&mut self, document: Document) -> Result<UploadOutcome, SessionError> {
        self.last_active = Utc::now();

        if self.engine.is_some() {
            let loaded = self.document_name.clone().unwrap_or_default();
            info!(session = %self.id, loaded = %loaded, ignored = %document.file_name, "document already loaded");
            return Ok(UploadOutcome::AlreadyLoaded { document: loaded });
        }

        let file_name = document.file_name.clone();
        let (engine, segments) = self.pipeline.build_engine(self.id, document).await?;

        self.engine = Some(engine);
        self.document_name = Some(file_name.clone());
        info!(session = %self.id, file = %file_name, segments, "chat engine ready");

        Ok(UploadOutcome::Indexed {
            document: file_name,
            segments,
        })
    }

    pub async fn on_question(&mut self, question: &str) -> Result<QuestionOutcome, SessionError> {
        self.last_active = Utc::now();

        let question = question.trim();
        if question.is_empty() {
            return Ok(QuestionOutcome::Ignored);
        }

        let Some(engine) = &self.engine else {
            return Ok(QuestionOutcome::NoDocument);
        };

        let reply = engine.chat(question, &self.history).await?;
        let turn = ConversationTurn {
            question: question.to_string(),
            answer: reply.answer,
            asked_at: Utc::now(),
            source_ids: reply
                .sources
                .iter()
                .map(|hit| hit.segment.segment_id.clone())
                .collect(),
        };

        self.history.push(turn.clone());
        info!(session = %self.id, turns = self.history.len(), "question answered");
        Ok(QuestionOutcome::Answered(turn))
    }

    /// Drops the engine and frees its backing store.
    pub async fn release(&mut self) -> Result<(), IndexError> {
        self.document_name = None;
        match self.engine.take() {
            Some(engine) => engine.index().release().await,
            None => Ok(()),
        }
    }
}
