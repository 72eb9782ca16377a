#![deny(missing_docs)]

//! Core library for the docstage ingestion pipeline.

/// HTTP routing and REST handlers.
pub mod api;
/// Chunking strategies.
pub mod chunking;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Structured logging and tracing setup.
pub mod logging;
/// Record and chunk counters.
pub mod metrics;
/// Document parsers and title segmentation.
pub mod parsing;
/// Message model, stage contract, batching and routing.
pub mod pipeline;
/// Qdrant vector store integration.
pub mod qdrant;
/// Assembly of stage executors from configuration.
pub mod runtime;
/// Concrete parse, chunk, embed and store executors.
pub mod stages;
/// Object store access for uploaded files.
pub mod storage;
/// Vector store seam and backends.
pub mod store;
