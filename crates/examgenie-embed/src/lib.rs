//! Embedding backends and the fallback dispatcher.
//!
//! - [`RemoteEmbedder`]: OpenAI-compatible HTTP API
//! - [`BgeM3Embedder`]: BGE-M3 run locally through candle
//! - [`HashingEmbedder`]: dependency-free local model for offline runs
//! - [`EmbeddingDispatcher`]: retries the external backend, then sticks to
//!   the local one for the rest of the session

pub mod bge;
pub mod dispatcher;
pub mod hashing;
pub mod pool;
pub mod remote;
pub mod tokenize;

pub use bge::BgeM3Embedder;
pub use dispatcher::{ActiveBackend, EmbedderNotice, EmbeddingDispatcher, LocalLoader, RetryPolicy};
pub use hashing::HashingEmbedder;
pub use pool::masked_mean_l2;
pub use remote::RemoteEmbedder;
