//! Knowledge collaborators: text embeddings, image similarity search and the
//! triple store behind keyword graphs.

pub mod embedding;
pub mod graph;
pub mod image_search;
pub mod segment;

pub use embedding::{Embedder, OpenAiEmbedder};
pub use graph::{build_chart, GraphLookup, KnowledgeGraph};
pub use image_search::{EmbeddingImageSearcher, ImageSearcher};
pub use segment::SegmentingEmbedder;
