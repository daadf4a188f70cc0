use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("uploaded file is empty: {0}")]
    Empty(String),

    #[error("uploaded file is not a pdf: {0}")]
    NotPdf(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf had no readable text: {0}")]
    NoText(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote conversion failed: {0}")]
    Remote(String),

    #[error("conversion worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable at {endpoint}: {details}")]
    Unavailable { endpoint: String, details: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding dimension {actual} does not match configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding failed during index build: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("keyword index error: {0}")]
    Keyword(#[from] tantivy::TantivyError),

    #[error("index request failed: {0}")]
    Request(String),

    #[error("index lock poisoned: {0}")]
    Poisoned(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("language model at {endpoint} timed out after {timeout_secs}s")]
    Timeout { endpoint: String, timeout_secs: u64 },

    #[error("language model unreachable at {endpoint}: {details}")]
    Unreachable { endpoint: String, details: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("language model returned an empty answer")]
    EmptyResponse,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("question embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("retrieval failed: {0}")]
    Index(#[from] IndexError),

    #[error("answer generation failed: {0}")]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl SessionError {
    /// Short label for the failing stage, used in logs and the error banner.
    pub fn stage(&self) -> &'static str {
        match self {
            SessionError::Conversion(_) => "conversion",
            SessionError::Index(IndexError::Embedding(_)) => "embedding",
            SessionError::Index(_) => "index",
            SessionError::Chat(ChatError::Embedding(_)) => "embedding",
            SessionError::Chat(ChatError::Index(_)) => "index",
            SessionError::Chat(ChatError::Generation(_)) => "generation",
        }
    }
}
