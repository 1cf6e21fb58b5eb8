//! Pluggable filtering of price-level annotations.
//!
//! The filter is injected into the pipeline at construction time. A filter
//! that fails on an item keeps it: losing a level because of a filter bug is
//! worse than emitting one too many.

use mia_core::JsonObject;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Symbol assumed when a level carries none.
pub const DEFAULT_SYMBOL: &str = "ES";

/// Failure of a filter on one item.
#[derive(Debug, Error)]
#[error("level filter failed: {0}")]
pub struct FilterError(pub String);

/// Predicate deciding whether a price level is emitted.
pub trait LevelFilter {
    /// Decide on one level. `metadata` is the full level object.
    fn should_emit(
        &self,
        symbol: &str,
        price: Option<f64>,
        metadata: &JsonObject,
    ) -> Result<bool, FilterError>;

    /// Name reported in the run summary.
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> LevelFilter for F
where
    F: Fn(&str, Option<f64>, &JsonObject) -> Result<bool, FilterError>,
{
    fn should_emit(
        &self,
        symbol: &str,
        price: Option<f64>,
        metadata: &JsonObject,
    ) -> Result<bool, FilterError> {
        self(symbol, price, metadata)
    }
}

/// Identity filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitAll;

impl LevelFilter for EmitAll {
    fn should_emit(&self, _: &str, _: Option<f64>, _: &JsonObject) -> Result<bool, FilterError> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "emit_all"
    }
}

/// Keeps levels whose `level_type` starts with one of the given prefixes
/// (e.g. `call_resistance`, `put_support`, `hvl`, `gex_`, `blind_spot_`).
///
/// A level without a `level_type` is an error, so it is kept.
#[derive(Debug, Clone)]
pub struct LevelTypeFilter {
    prefixes: Vec<String>,
}

impl LevelTypeFilter {
    /// Create a filter from type prefixes.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl LevelFilter for LevelTypeFilter {
    fn should_emit(
        &self,
        _symbol: &str,
        _price: Option<f64>,
        metadata: &JsonObject,
    ) -> Result<bool, FilterError> {
        let level_type = metadata
            .get("level_type")
            .and_then(Value::as_str)
            .ok_or_else(|| FilterError("missing level_type".to_string()))?;
        Ok(self.prefixes.iter().any(|p| level_type.starts_with(p.as_str())))
    }

    fn name(&self) -> &str {
        "level_type"
    }
}

/// Outcome counters of filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    /// Levels emitted.
    pub kept: u64,
    /// Levels rejected by the predicate.
    pub dropped: u64,
    /// Levels kept because the predicate failed.
    pub errors: u64,
}

/// Run a bucket's level list through a filter, preserving order.
pub fn apply_filter(
    levels: Vec<JsonObject>,
    filter: &dyn LevelFilter,
    stats: &mut FilterStats,
) -> Vec<JsonObject> {
    levels
        .into_iter()
        .filter(|level| {
            let symbol = level
                .get("sym")
                .or_else(|| level.get("symbol"))
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SYMBOL);
            let price = level.get("price").and_then(Value::as_f64);
            let keep = match filter.should_emit(symbol, price, level) {
                Ok(keep) => keep,
                Err(e) => {
                    tracing::debug!(error = %e, "keeping level after filter error");
                    stats.errors += 1;
                    true
                }
            };
            if keep {
                stats.kept += 1;
            } else {
                stats.dropped += 1;
            }
            keep
        })
        .collect()
}
