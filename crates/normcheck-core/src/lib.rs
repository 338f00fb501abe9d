//! # normcheck core
//!
//! I/O-free building blocks for checking construction plans against DIN
//! standards: data models, the recursive chunker, the flat similarity index
//! and keyword table, manifest freshness rules, the feedback digest, and the
//! compliance prompt/reply contract.
//!
//! This crate performs no filesystem or network access. Persistence, HTTP
//! clients and PDF handling live in the `normcheck` app crate.

pub mod chunk;
pub mod embedding;
pub mod feedback;
pub mod index;
pub mod manifest;
pub mod models;
pub mod report;
