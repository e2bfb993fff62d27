pub mod chunker;
pub mod extract;
pub mod policy;
pub mod processor;

pub use chunker::{Chunker, RawChunk};
pub use processor::{IngestionError, IngestionPipeline, DEFAULT_JOB_TIMEOUT};
