pub mod answer;
pub mod context;
pub mod rerank;
pub mod retriever;

pub use answer::{AnswerError, AnswerGenerator, AnswerResponse, Citation, StreamEvent};
pub use context::{BuiltContext, ContextBuilder};
pub use rerank::{RerankMode, RerankPort, Reranker};
pub use retriever::{ChunkSource, RetrievalMode, Retriever, RetrieverError, ScoredChunk};
