//! Artifact extraction: free-form LLM text to named deliverable files.

pub mod extractor;
pub mod types;

pub use extractor::ArtifactExtractor;
pub use types::{ArtifactKind, ArtifactMeta, ExtractionOutcome};
