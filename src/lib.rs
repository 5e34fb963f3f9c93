//! Docent - retrieval-augmented chat over teaching knowledge bases
//!
//! Course material is chunked with Markdown-aware heuristics, embedded and
//! persisted as per-knowledge-base vector indices. Questions are answered by
//! retrieving across several knowledge bases, reranking with per-file
//! diversity, and streaming a grounded completion together with a
//! provenance tree of the passages it cites.

pub mod chat;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod retrieval;
pub mod server;
pub mod store;

pub use error::{DocentError, Result};
