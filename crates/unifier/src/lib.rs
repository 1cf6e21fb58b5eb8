//! Time-bucketed unification of MIA event streams.
//!
//! This crate handles:
//! - Ordering repairs of value-area and VWAP-band fields
//! - Pluggable filtering of price-level annotations
//! - Carry-forward of sparse groups and cumulative-delta rebuild
//! - Snapshot serialization (plain or gzip JSON-Lines)
//! - The end-to-end [`Unifier`] pipeline

pub mod carry;
pub mod engine;
pub mod level_filter;
pub mod normalizer;
pub mod serializer;

pub use carry::{CarryForward, CumulativeDelta};
pub use engine::{Unifier, UnifyReport};
pub use level_filter::{
    apply_filter, EmitAll, FilterError, FilterStats, LevelFilter, LevelTypeFilter,
};
pub use normalizer::{normalize_bucket, repair_value_area, repair_vwap_bands, RepairStats};
pub use serializer::{output_path, OutputSink, SnapshotSerializer, UnifiedSnapshot};
