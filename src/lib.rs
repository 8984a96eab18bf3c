//! # Multimodal Index
//!
//! A local-first multimodal ingestion and retrieval pipeline.
//!
//! PDF, DOCX and plain-text documents are split into character-bounded
//! chunks, images become one unit each, and audio is transcribed into
//! time-windowed segments. Every unit is embedded into one shared vector
//! space (CLIP ViT-B/32), so a text query can find an image and an image
//! query can find a paragraph. Units are stored under deterministic ids, so
//! re-ingesting a file replaces its units instead of duplicating them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐   ┌──────────┐
//! │ Scan + Parse │──▶│ Embed + Ids  │──▶│ Indexer  │──▶│  Store   │
//! │ PDF/DOCX/... │   │ CLIP text/img│   │ batches  │   │ SQLite   │
//! └─────────────┘   └──────────────┘   └──────────┘   └────┬─────┘
//!                                                          │
//!                      ┌───────────────────────────────────┤
//!                      ▼                                   ▼
//!                 ┌──────────┐                        ┌──────────┐
//!                 │   CLI    │                        │   HTTP   │
//!                 │  (mmi)   │                        │  (axum)  │
//!                 └──────────┘                        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mmi init
//! mmi ingest ./docs
//! mmi search "who signed the contract" --filter type=text
//! mmi serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Units, metadata and run reports |
//! | [`error`] | Error taxonomy |
//! | [`scan`] | File discovery |
//! | [`extract`] | PDF, DOCX and text extraction |
//! | [`chunk`] | Character-bounded text chunking |
//! | [`images`] | Image units |
//! | [`audio`] | Transcription and segment grouping |
//! | [`embedding`] | Embedder abstraction (CLIP, hash) |
//! | [`identity`] | Deterministic unit ids |
//! | [`indexer`] | Validated, batched upserts |
//! | [`store`] | Vector store backends |
//! | [`filter`] | Metadata filters |
//! | [`search`] | Text and image retrieval |
//! | [`ingest`] | Pipeline orchestration |
//! | [`server`] | JSON HTTP server |

pub mod audio;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod filter;
pub mod identity;
pub mod images;
pub mod indexer;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod retry;
pub mod scan;
pub mod search;
pub mod server;
pub mod store;
