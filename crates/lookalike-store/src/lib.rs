//! lookalike-store — Character metadata persistence.
//!
//! SQLite-backed records keyed by identity path, and the CSV ingestion job
//! that recreates them from a mapping file.

pub mod ingest;
pub mod store;

pub use ingest::{ingest, ingest_reader, IngestError, IngestReport, SkipReason, SkippedRow};
pub use store::{MetadataStore, NewCharacter, StoreError};
