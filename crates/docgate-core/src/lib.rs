//! # docgate core
//!
//! Runtime-free logic shared by the docgate pipeline: data models, the
//! error taxonomy, quality policy, the confidence gate, chunking, the
//! embedding trait, the store abstraction, hybrid retrieval, and trigger
//! rules.
//!
//! This crate contains no tokio, sqlx, image decoding, or filesystem
//! I/O. Everything that touches bytes on disk or pixels lives in the
//! `docgate` app crate.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Documents, pages, signals, extraction results, chunks, hits, events |
//! | [`error`] | [`PipelineError`](error::PipelineError) taxonomy |
//! | [`quality`] | Quality thresholds and signal classification |
//! | [`gate`] | Per-page confidence gate state machine |
//! | [`chunk`] | Overlapping window and section-aware chunker |
//! | [`embedding`] | Embedding trait, hashing embedder, content-hash cache |
//! | [`lexical`] | Multi-field fuzzy keyword scoring |
//! | [`store`] | Storage trait and in-memory implementation |
//! | [`search`] | Hybrid retriever with per-query normalization |
//! | [`trigger`] | Notification trigger rules |

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod gate;
pub mod lexical;
pub mod models;
pub mod quality;
pub mod search;
pub mod store;
pub mod trigger;

pub use error::PipelineError;
