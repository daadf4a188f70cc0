pub mod keyword;
pub mod memory;
pub mod qdrant;

pub use keyword::KeywordStore;
pub use memory::MemoryStore;
pub use qdrant::QdrantStore;
