//! # Paperweave
//!
//! A local-first literature corpus pipeline.
//!
//! Paperweave scans a directory of PDFs, extracts bibliographic metadata,
//! classifies each paper into a configured subject taxonomy with an
//! LLM, files it into a subject-structured archive and maintains a
//! relationship graph of content similarity, shared authorship and
//! subject membership.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌───────────┐
//! │ Scanner  │──▶│ Extract  │──▶│ Classifier │──▶│ Organizer │
//! │ hash+dedup│  │ PDF text │   │ LLM+cache  │   │ archive   │
//! └──────────┘   └──────────┘   └────────────┘   └─────┬─────┘
//!                                                      │
//!                  ┌───────────────┐             ┌─────▼─────┐
//!                  │ Graph builder │◀───────────▶│  Catalog  │
//!                  │ TF-IDF+Jaccard│             │  SQLite   │
//!                  └───────────────┘             └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pw init                       # create database
//! pw run                        # scan, classify, archive, build graph
//! pw list "Computer Science/Machine Learning"
//! pw search "neural"
//! pw export --output graph.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`catalog`] | SQLite catalog store |
//! | [`scanner`] | Input discovery and content hashing |
//! | [`extract`] | PDF text and metadata extraction |
//! | [`classifier`] | LLM subject classification |
//! | [`cache`] | Classification cache |
//! | [`organizer`] | Archive placement and crash recovery |
//! | [`graph`] | Relationship graph rebuilds |
//! | [`pipeline`] | Batch orchestration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod extract;
pub mod get;
pub mod graph;
pub mod migrate;
pub mod models;
pub mod organizer;
pub mod pipeline;
pub mod scanner;
pub mod search;
pub mod stats;
