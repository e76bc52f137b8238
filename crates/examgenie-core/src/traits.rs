use crate::error::Result;
use crate::types::BackendKind;

/// One embedding backend. Implementations must return one vector per input,
/// in input order, each of length `dim()`.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the backend/model, recorded in index manifests.
    fn backend_id(&self) -> &str;
    fn kind(&self) -> BackendKind;
    fn dim(&self) -> usize;
    /// Largest batch the provider accepts in one call.
    fn max_batch(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
