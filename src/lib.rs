//! # docgate
//!
//! Quality-gated document extraction with hybrid semantic/lexical retrieval
//! and similarity alerts.
//!
//! Every incoming document is measured, routed to an extraction engine by
//! its sniffed type, and gated page by page on extraction confidence. Low
//! confidence pages get one enhancement retry; whatever still falls short
//! goes to a human review queue instead of the index. Accepted text is
//! chunked, embedded, indexed for hybrid search and checked against
//! standing trigger rules.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────────────────┐   ┌──────────┐
//! │ Connector  │──▶│ Pipeline                              │──▶│  SQLite  │
//! │ filesystem │   │ size → route → extract → gate → chunk │   │ docs/vec │
//! └────────────┘   │   → embed → index → triggers          │   └────┬─────┘
//!                  └──────────────┬───────────────────────┘        │
//!                                 ▼                    ┌───────────┤
//!                          ┌────────────┐              ▼           ▼
//!                          │ review     │         ┌────────┐  ┌────────┐
//!                          │ queue      │         │  CLI   │  │  HTTP  │
//!                          └────────────┘         └────────┘  └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docgate init
//! docgate ingest
//! docgate search "relief valve" --mode hybrid
//! docgate review list
//! docgate serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite [`Store`](docgate_core::store::Store) |
//! | [`router`] | Byte sniffing and route selection |
//! | [`quality`] | Resolution, blur, contrast and density measurements |
//! | [`enhance`] | Deskew, denoise, contrast and upscale for the OCR retry |
//! | [`extract`] | Text, office, PDF, OCR and CAD engines |
//! | [`language`] | Per-word script detection |
//! | [`lease`] | Per-document stage leases |
//! | [`embedding`] | OpenAI, Ollama and local embedding providers |
//! | [`connector`] | Connector trait and filesystem connector |
//! | [`sinks`] | Review queue and trigger notification sinks |
//! | [`pipeline`] | Orchestrator tying the stages together |
//! | [`ingest`] / [`search`] / [`review`] / [`documents`] / [`reconcile`] | Commands |
//! | [`server`] | HTTP API |
//!
//! Pure, storage-agnostic logic (models, gate, chunker, lexical scoring,
//! hybrid ranking, triggers, the `Store` trait) lives in `docgate-core`.

pub mod config;
pub mod connector;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod enhance;
pub mod extract;
pub mod ingest;
pub mod language;
pub mod lease;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod quality;
pub mod reconcile;
pub mod review;
pub mod router;
pub mod search;
pub mod server;
pub mod sinks;
pub mod sqlite_store;
