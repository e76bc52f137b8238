//! Persistent exact-search vector index.

pub mod persist;
pub mod similarity;
pub mod store;

pub use similarity::cosine;
pub use store::VectorIndex;
