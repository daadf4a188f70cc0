pub mod chat;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod llm;
pub mod models;
pub mod retriever;
pub mod session;
pub mod stores;
pub mod traits;

pub use chat::{compose_messages, ChatEngine, ChatReply};
pub use chunking::{normalize_whitespace, split_markdown, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OllamaEmbedder, TeiEmbedder, BGE_SMALL_DIMENSIONS,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ChatError, ConversionError, EmbeddingError, GenerationError, IndexError, SessionError,
};
pub use extractor::{
    extract_page_texts, ConversionOptions, Converted, DocumentIngestor, LopdfConverter, PageText,
    PdfConverter, RemoteConverter, RemoteConverterConfig,
};
pub use index::{IndexBuilder, IndexHandle};
pub use llm::{LanguageModel, OllamaChat, DEFAULT_REQUEST_TIMEOUT};
pub use models::{
    ChatMessage, ConversationTurn, Document, IndexEntry, NormalizedText, PipelineOptions,
    RetrievalMode, Role, ScoredSegment, Segment, SegmentMetadata, SourceMetadata,
    DEFAULT_SYSTEM_PROMPT,
};
pub use retriever::HybridRetriever;
pub use session::{Pipeline, QuestionOutcome, Session, StoreBackend, UploadOutcome};
pub use stores::{KeywordStore, MemoryStore, QdrantStore};
pub use traits::{KeywordIndex, VectorIndex};
