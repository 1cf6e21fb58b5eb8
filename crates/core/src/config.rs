//! Configuration structures for the unifier.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{FieldGroup, TimeScale};

/// Main configuration for one unification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnifierConfig {
    /// Root directory holding the per-chart dumps.
    pub input_root: PathBuf,
    /// Target date, `YYYYMMDD` or `today`.
    pub date: String,
    /// Output file; derived from the date when absent.
    pub output: Option<PathBuf>,
    /// Bucket width in seconds.
    pub tolerance_secs: f64,
    /// Maximum order-book levels kept per side.
    pub max_depth_levels: u32,
    /// Unit of the input `t` field.
    pub time_scale: TimeScale,
    /// Field groups to emit; all groups when absent.
    pub include: Option<BTreeSet<FieldGroup>>,
    /// Run price-level annotations through the level filter.
    pub level_filter: bool,
    /// Write gzip-compressed output.
    pub gzip: bool,
    /// Append only buckets newer than the last line already in the output.
    pub append_stream: bool,
    /// Hours added to every input timestamp.
    pub timezone_offset_hours: f64,
    /// Carry-forward of sparse groups into empty buckets.
    pub carry_forward: CarryForwardConfig,
    /// Rebuild cumulative delta from order-flow summaries.
    pub recompute_cumulative_delta: bool,
}

impl Default for UnifierConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("."),
            date: "today".to_string(),
            output: None,
            tolerance_secs: 0.2,
            max_depth_levels: 20,
            time_scale: TimeScale::FractionalDay,
            include: None,
            level_filter: false,
            gzip: false,
            append_stream: false,
            timezone_offset_hours: 0.0,
            carry_forward: CarryForwardConfig::default(),
            recompute_cumulative_delta: false,
        }
    }
}

/// Time-to-live settings for re-emitting the last known value of sparse
/// groups. `None` disables carry-forward for that group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CarryForwardConfig {
    /// TTL for price-level annotations, in seconds.
    pub levels_ttl_secs: Option<f64>,
    /// TTL for the correlation group, in seconds.
    pub correlation_ttl_secs: Option<f64>,
}

impl UnifierConfig {
    /// Load a configuration from a TOML file. Missing keys take defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Check value ranges and the date format.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance_secs.is_finite() && self.tolerance_secs > 0.0) {
            return Err(Error::config(format!(
                "tolerance must be a positive number of seconds, got {}",
                self.tolerance_secs
            )));
        }
        if self.max_depth_levels == 0 {
            return Err(Error::config("max_depth_levels must be at least 1"));
        }
        if !self.timezone_offset_hours.is_finite() {
            return Err(Error::config("timezone offset must be finite"));
        }
        for ttl in [
            self.carry_forward.levels_ttl_secs,
            self.carry_forward.correlation_ttl_secs,
        ]
        .into_iter()
        .flatten()
        {
            if !(ttl.is_finite() && ttl >= 0.0) {
                return Err(Error::config(format!("carry-forward TTL must be >= 0, got {ttl}")));
            }
        }
        self.resolved_date()?;
        Ok(())
    }

    /// Resolve `today` to the local date and check the `YYYYMMDD` format.
    pub fn resolved_date(&self) -> Result<String> {
        if self.date.eq_ignore_ascii_case("today") {
            return Ok(Local::now().format("%Y%m%d").to_string());
        }
        NaiveDate::parse_from_str(&self.date, "%Y%m%d")
            .map_err(|e| Error::config(format!("invalid date '{}': {e}", self.date)))?;
        Ok(self.date.clone())
    }

    /// Whether a field group is part of the output.
    #[inline]
    pub fn includes(&self, group: FieldGroup) -> bool {
        self.include.as_ref().map_or(true, |set| set.contains(&group))
    }
}
