//! # normcheck
//!
//! Checks construction plans against a corpus of DIN standards with
//! retrieval-augmented analysis.
//!
//! Standard documents (PDF) are extracted page by page, with OCR for scans
//! and optional image analysis for diagrams, split into overlapping
//! segments and indexed. A plan excerpt retrieves the closest segments,
//! which are sent with the plan and a digest of reviewer feedback to a
//! reasoning service that returns a structured compliance report.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ din_norms/  │──▶│   Ingestor   │──▶│    Retriever     │
//! │  *.pdf      │   │ extract+chunk│   │ vector | keyword │
//! └─────────────┘   └──────┬───────┘   └────────┬─────────┘
//!                          │ manifest           │ hits
//!                          ▼                    ▼
//!                   ┌────────────┐       ┌────────────┐    ┌──────────┐
//!                   │ cache gate │       │  Analyzer  │◀───│ feedback │
//!                   └────────────┘       └─────┬──────┘    └──────────┘
//!                                              │
//!                                  ┌───────────┴──────────┐
//!                                  ▼                      ▼
//!                             ┌─────────┐           ┌──────────┐
//!                             │   CLI   │           │   HTTP   │
//!                             └─────────┘           └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`client`] | Shared HTTP client with retry |
//! | [`embedding`] | OpenAI / Ollama embedders |
//! | [`completion`] | Reasoning service client |
//! | [`vision`] | Image-understanding client |
//! | [`ocr`] | Page rendering and OCR |
//! | [`extract`] | PDF text extraction with fallbacks |
//! | [`ingest`] | Source scanning and segmentation |
//! | [`retrieval`] | Vector and keyword retrieval backends |
//! | [`cache`] | Ingestion manifest |
//! | [`feedback`] | Reviewer feedback log |
//! | [`usage`] | Token usage and budget |
//! | [`analyzer`] | Compliance check |
//! | [`plans`] | Uploaded plans and their records |
//! | [`service`] | The [`service::Checker`] context object |
//! | [`server`] | HTTP API |

pub mod analyzer;
pub mod cache;
pub mod client;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod feedback;
pub mod ingest;
mod json_file;
pub mod ocr;
pub mod plans;
pub mod retrieval;
pub mod server;
pub mod service;
pub mod usage;
pub mod vision;

#[cfg(test)]
mod test_support;
