mod render;
mod server;
mod state;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use docchat_core::{
    CharacterNgramEmbedder, ChunkingConfig, DocumentIngestor, Embedder, OllamaChat,
    OllamaEmbedder, Pipeline, PipelineOptions, RemoteConverter, RemoteConverterConfig,
    StoreBackend, TeiEmbedder, BGE_SMALL_DIMENSIONS, DEFAULT_EMBEDDING_DIMENSIONS,
};
use server::AppState;
use state::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Local hashed character n-grams; no external service.
    Ngram,
    Ollama,
    Tei,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VectorStoreKind {
    Memory,
    Qdrant,
}

#[derive(Parser)]
#[command(name = "docchat", version, about = "Upload a PDF and chat with it")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "DOCCHAT_BIND", default_value = "127.0.0.1:8501")]
    bind: String,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Chat model served by Ollama
    #[arg(long, env = "DOCCHAT_LLM_MODEL", default_value = "mistral")]
    llm_model: String,

    /// Per-request timeout for the language model, in seconds
    #[arg(long, env = "DOCCHAT_REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    request_timeout_secs: u64,

    #[arg(long, value_enum, env = "DOCCHAT_EMBEDDER", default_value = "ollama")]
    embedder: EmbedderKind,

    /// Embedding model; defaults depend on the embedder
    #[arg(long, env = "DOCCHAT_EMBED_MODEL")]
    embed_model: Option<String>,

    /// Embedding vector size; defaults depend on the embedder
    #[arg(long, env = "DOCCHAT_EMBED_DIMENSIONS")]
    embed_dimensions: Option<usize>,

    /// Text Embeddings Inference base URL
    #[arg(long, env = "DOCCHAT_TEI_URL", default_value = "http://localhost:8080")]
    tei_url: String,

    #[arg(long, value_enum, env = "DOCCHAT_VECTOR_STORE", default_value = "memory")]
    vector_store: VectorStoreKind,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Prefix for per-session Qdrant collections
    #[arg(long, env = "DOCCHAT_QDRANT_COLLECTION", default_value = "document_chat")]
    qdrant_collection: String,

    /// Remote PDF converter used when local extraction fails
    #[arg(long, env = "DOCCHAT_CONVERTER_ENDPOINT")]
    converter_endpoint: Option<String>,

    #[arg(long, env = "DOCCHAT_CONVERTER_API_KEY", hide_env_values = true)]
    converter_api_key: Option<String>,

    /// Number of segments retrieved per question
    #[arg(long, env = "DOCCHAT_TOP_K", default_value_t = 2)]
    top_k: usize,

    /// Embedding batch size during indexing
    #[arg(long, env = "DOCCHAT_BATCH_SIZE", default_value_t = 20)]
    batch_size: usize,

    /// Disable keyword retrieval and rank by vectors only
    #[arg(long, env = "DOCCHAT_VECTOR_ONLY", default_value_t = false)]
    vector_only: bool,

    /// Vector weight in hybrid fusion, between 0 and 1
    #[arg(long, env = "DOCCHAT_ALPHA", default_value_t = 0.5)]
    alpha: f64,

    /// Prior turns included in each prompt
    #[arg(long, env = "DOCCHAT_MEMORY_TURNS", default_value_t = 3)]
    memory_turns: usize,

    /// Also split sections at blank-line paragraph breaks
    #[arg(long, env = "DOCCHAT_SPLIT_PARAGRAPHS", default_value_t = false)]
    split_paragraphs: bool,

    /// Largest accepted upload, in megabytes
    #[arg(long, env = "DOCCHAT_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Idle minutes before a session and its index are dropped
    #[arg(long, env = "DOCCHAT_SESSION_TTL_MINS", default_value_t = 120)]
    session_ttl_mins: u64,
}

impl Cli {
    fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        Ok(match self.embedder {
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder {
                dimensions: self.embed_dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            }),
            EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
                &self.ollama_url,
                self.embed_model.as_deref().unwrap_or("nomic-embed-text"),
                self.embed_dimensions.unwrap_or(768),
            )?),
            EmbedderKind::Tei => Arc::new(TeiEmbedder::new(
                &self.tei_url,
                self.embed_model
                    .as_deref()
                    .unwrap_or("BAAI/bge-small-en-v1.5"),
                self.embed_dimensions.unwrap_or(BGE_SMALL_DIMENSIONS),
            )?),
        })
    }

    fn ingestor(&self) -> DocumentIngestor {
        let remote = match &self.converter_endpoint {
            Some(endpoint) => {
                RemoteConverterConfig::new(endpoint.clone(), self.converter_api_key.clone())
            }
            None => None,
        };
        match remote {
            Some(config) => {
                DocumentIngestor::default().with_fallback(Box::new(RemoteConverter::new(config)))
            }
            None => DocumentIngestor::default(),
        }
    }

    fn backend(&self) -> StoreBackend {
        match self.vector_store {
            VectorStoreKind::Memory => StoreBackend::Memory,
            VectorStoreKind::Qdrant => StoreBackend::Qdrant {
                endpoint: self.qdrant_url.clone(),
                collection_prefix: self.qdrant_collection.clone(),
            },
        }
    }

    fn options(&self) -> anyhow::Result<PipelineOptions> {
        if !(0.0..=1.0).contains(&self.alpha) {
            anyhow::bail!("--alpha must be between 0 and 1, got {}", self.alpha);
        }
        if self.top_k == 0 || self.batch_size == 0 {
            anyhow::bail!("--top-k and --batch-size must be positive");
        }
        Ok(PipelineOptions {
            top_k: self.top_k,
            batch_size: self.batch_size,
            hybrid: !self.vector_only,
            alpha: self.alpha,
            memory_turns: self.memory_turns,
            ..PipelineOptions::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let options = cli.options()?;
    let embedder = cli.embedder()?;
    let llm = Arc::new(OllamaChat::new(
        &cli.ollama_url,
        &cli.llm_model,
        Duration::from_secs(cli.request_timeout_secs),
    )?);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        llm = %cli.llm_model,
        embedder = embedder.model_name(),
        dimensions = embedder.dimensions(),
        store = ?cli.vector_store,
        hybrid = options.hybrid,
        "docchat boot"
    );

    let pipeline = Pipeline::new(cli.ingestor(), embedder, llm)
        .with_chunking(ChunkingConfig {
            split_paragraphs: cli.split_paragraphs,
        })
        .with_backend(cli.backend())
        .with_options(options);

    let sessions = Arc::new(SessionStore::new(
        Arc::new(pipeline),
        Duration::from_secs(cli.session_ttl_mins * 60),
    ));
    let app = server::router(AppState { sessions }, cli.max_upload_mb * 1024 * 1024);

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
