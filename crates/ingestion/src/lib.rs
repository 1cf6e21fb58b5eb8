//! Data ingestion for the MIA stream unifier.
//!
//! This crate handles:
//! - Input discovery (`chart_<id>_<kind>_<date>.jsonl`)
//! - Lazy JSON-Lines reading with malformed-line skipping
//! - Bucket assignment and per-kind accumulation

pub mod bucket;
pub mod reader;

pub use bucket::{AccumulateStats, Bucket, BucketAssigner, BucketTable, DepthBook, OrderFlowEntry};
pub use reader::{discover_inputs, organized_dir, read_all, InputSource, JsonlReader, ReadStats};
