// src/lib.rs

pub mod backend;
pub mod config;
pub mod constants;
pub mod generator; // Deterministic backup-style key layout
pub mod listing;
pub mod metrics;
pub mod orchestrator;
pub mod s3;
pub mod signer; // V2 request signing for the object hot path
pub mod size_parser;
pub mod tsv_export; // TSV export for machine-readable results
pub mod worker;


pub use backend::{ObjectBackend, OpOutcome, Payload};
pub use config::{BenchmarkConfig, Mode};
pub use orchestrator::{BenchmarkOrchestrator, RunSummary};
