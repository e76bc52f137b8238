pub mod service;

pub use service::{IndexStatus, RetrievalService};
