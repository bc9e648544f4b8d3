//! # paperweave core
//!
//! Pure logic shared by the paperweave pipeline: data models, PDF metadata
//! heuristics, author normalization, taxonomy matching, LLM answer parsing,
//! TF-IDF vectors and relationship-graph computation.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! Every function is deterministic for identical inputs.

pub mod authors;
pub mod error;
pub mod graph;
pub mod metadata;
pub mod models;
pub mod response;
pub mod taxonomy;
pub mod tfidf;
