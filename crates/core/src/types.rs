//! Core data types for the MIA stream unifier.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Seconds per day, used to turn fractional-day timestamps into seconds.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// A JSON object as read from one input line.
pub type JsonObject = Map<String, Value>;

/// Unit of the `t` field carried by input events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeScale {
    /// Fractional days (Sierra Chart `SCDateTime`); one unit is 86 400 seconds.
    #[default]
    FractionalDay,
    /// Plain seconds.
    Seconds,
}

impl TimeScale {
    /// Convert a native timestamp to seconds.
    #[inline]
    pub fn to_seconds(self, t: f64) -> f64 {
        match self {
            TimeScale::FractionalDay => t * SECONDS_PER_DAY,
            TimeScale::Seconds => t,
        }
    }

    /// Express an hour offset in native units.
    #[inline]
    pub fn hours(self, hours: f64) -> f64 {
        match self {
            TimeScale::FractionalDay => hours / 24.0,
            TimeScale::Seconds => hours * 3600.0,
        }
    }

    /// Index of the day a native timestamp falls in.
    #[inline]
    pub fn day_index(self, t: f64) -> i64 {
        (self.to_seconds(t) / SECONDS_PER_DAY).floor() as i64
    }
}

impl FromStr for TimeScale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fractional_day" | "day" | "days" => Ok(TimeScale::FractionalDay),
            "seconds" | "secs" | "s" => Ok(TimeScale::Seconds),
            other => Err(Error::config(format!("unknown time scale '{other}'"))),
        }
    }
}

/// Sub-stream of the per-bar order-flow data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderFlowPart {
    /// Per-price footprint (`nbcv_footprint`).
    Footprint,
    /// Bar metrics (`nbcv_metrics`).
    Metrics,
    /// Order-flow summary (`nbcv_orderflow`).
    Orderflow,
}

/// Kind tag of an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// OHLCV base data (`basedata`).
    Bar,
    /// Session VWAP with bands (`vwap`).
    Vwap,
    /// Volume value area: VAH / VPOC / VAL (`vva`).
    ValueArea,
    /// Previous session VWAP (`pvwap`).
    PreviousVwap,
    /// Volatility index (`vix`).
    VolatilityIndex,
    /// Best bid/ask quote (`quote`).
    Quote,
    /// Time and sales print (`trade`).
    Trade,
    /// One order-book level (`depth`).
    Depth,
    /// Order-flow sub-stream keyed by bar index.
    OrderFlow(OrderFlowPart),
    /// Price-level annotation (`menthorq_level`).
    PriceLevel,
    /// Average true range (`atr`).
    AverageTrueRange,
    /// High/low volume nodes (`hvn_lvn`).
    VolumeNode,
    /// Previous session value area (`pvva`).
    PreviousValueArea,
    /// Cumulative delta (`cumulative_delta`).
    CumulativeDelta,
    /// Inter-market correlation coefficient (`correlation`).
    Correlation,
    /// Anything else; passed through untouched.
    Extra,
}

impl EventKind {
    /// Resolve a `type` tag. Unknown tags map to [`EventKind::Extra`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "basedata" => EventKind::Bar,
            "vwap" | "vwap_current" => EventKind::Vwap,
            "vva" | "volume_profile" => EventKind::ValueArea,
            "pvwap" | "vwap_previous" => EventKind::PreviousVwap,
            "vix" => EventKind::VolatilityIndex,
            "quote" => EventKind::Quote,
            "trade" => EventKind::Trade,
            "depth" => EventKind::Depth,
            "nbcv_footprint" => EventKind::OrderFlow(OrderFlowPart::Footprint),
            "nbcv_metrics" => EventKind::OrderFlow(OrderFlowPart::Metrics),
            "nbcv_orderflow" => EventKind::OrderFlow(OrderFlowPart::Orderflow),
            "menthorq_level" | "menthorq" => EventKind::PriceLevel,
            "atr" => EventKind::AverageTrueRange,
            "hvn_lvn" => EventKind::VolumeNode,
            "pvva" | "volume_profile_previous" => EventKind::PreviousValueArea,
            "cumulative_delta" => EventKind::CumulativeDelta,
            "correlation" => EventKind::Correlation,
            _ => EventKind::Extra,
        }
    }

    /// Output group holding the latest event of a replace-on-write kind.
    ///
    /// Returns `None` for the keyed and list kinds (depth, order flow, price
    /// levels, passthrough).
    pub fn scalar_group(self) -> Option<FieldGroup> {
        match self {
            EventKind::Bar => Some(FieldGroup::BaseData),
            EventKind::Vwap => Some(FieldGroup::Vwap),
            EventKind::ValueArea => Some(FieldGroup::ValueArea),
            EventKind::PreviousVwap => Some(FieldGroup::PreviousVwap),
            EventKind::VolatilityIndex => Some(FieldGroup::VolatilityIndex),
            EventKind::Quote => Some(FieldGroup::Quote),
            EventKind::Trade => Some(FieldGroup::Trade),
            EventKind::AverageTrueRange => Some(FieldGroup::AverageTrueRange),
            EventKind::VolumeNode => Some(FieldGroup::VolumeNode),
            EventKind::PreviousValueArea => Some(FieldGroup::PreviousValueArea),
            EventKind::CumulativeDelta => Some(FieldGroup::CumulativeDelta),
            EventKind::Correlation => Some(FieldGroup::Correlation),
            EventKind::Depth
            | EventKind::OrderFlow(_)
            | EventKind::PriceLevel
            | EventKind::Extra => None,
        }
    }
}

/// One parsed input line.
///
/// `raw` keeps the whole object (including `t`, `sym` and `type`) so that
/// scalar groups and passthrough entries are emitted exactly as read.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Resolved kind.
    pub kind: EventKind,
    /// Timestamp in the input's native scale.
    pub t: f64,
    /// Instrument symbol, if the line carries one.
    pub symbol: Option<String>,
    /// The original JSON object.
    pub raw: JsonObject,
}

impl Event {
    /// Build an event from a parsed JSON object.
    ///
    /// Returns `None` when no numeric timestamp can be resolved from `t`.
    pub fn from_object(raw: JsonObject) -> Option<Self> {
        let t = match raw.get("t")? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if !t.is_finite() {
            return None;
        }

        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .map(EventKind::from_tag)
            .unwrap_or(EventKind::Extra);

        let symbol = raw
            .get("sym")
            .or_else(|| raw.get("symbol"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            kind,
            t,
            symbol,
            raw,
        })
    }

    /// Field of the payload as read. JSON `null` counts as absent.
    #[inline]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.raw.get(name).filter(|value| !value.is_null())
    }

    /// Integer field of the payload (floats are not accepted).
    #[inline]
    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.raw.get(name).and_then(Value::as_i64)
    }

    /// String field of the payload.
    #[inline]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.raw.get(name).and_then(Value::as_str)
    }

    /// Shift the timestamp by `delta` native units, keeping `raw["t"]` in sync.
    pub fn shift_time(&mut self, delta: f64) {
        if delta == 0.0 {
            return;
        }
        self.t += delta;
        if let Some(n) = serde_json::Number::from_f64(self.t) {
            self.raw.insert("t".to_string(), Value::Number(n));
        }
    }
}

/// Quantized timestamp identifying a bucket.
///
/// Stored as the integer multiple of the tolerance so that keys compare
/// exactly; [`BucketKey::seconds`] recovers `round(secs / tol) * tol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey(pub i64);

impl BucketKey {
    /// Quantize a time in seconds. Ties round to even, like Python's `round`.
    #[inline]
    pub fn from_seconds(secs: f64, tolerance: f64) -> Self {
        BucketKey((secs / tolerance).round_ties_even() as i64)
    }

    /// Quantized time in seconds.
    #[inline]
    pub fn seconds(self, tolerance: f64) -> f64 {
        self.0 as f64 * tolerance
    }
}

/// Order-book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DepthSide {
    #[serde(rename = "BID")]
    Bid,
    #[serde(rename = "ASK")]
    Ask,
}

impl DepthSide {
    /// Parse the exact `BID` / `ASK` tags written by the dumper.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "BID" => Some(DepthSide::Bid),
            "ASK" => Some(DepthSide::Ask),
            _ => None,
        }
    }
}

/// Price and size at one order-book level, kept exactly as read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Option<Value>,
    pub size: Option<Value>,
}

/// Named block of the unified snapshot; also the vocabulary of the
/// `include` allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    #[serde(rename = "basedata")]
    BaseData,
    Vwap,
    #[serde(rename = "vva")]
    ValueArea,
    #[serde(rename = "pvwap")]
    PreviousVwap,
    #[serde(rename = "vix")]
    VolatilityIndex,
    Quote,
    Trade,
    Depth,
    #[serde(rename = "nbcv")]
    OrderFlow,
    Levels,
    #[serde(rename = "atr")]
    AverageTrueRange,
    #[serde(rename = "hvn_lvn")]
    VolumeNode,
    #[serde(rename = "pvva")]
    PreviousValueArea,
    CumulativeDelta,
    Correlation,
    Extra,
}

impl FieldGroup {
    /// Every group, in output order.
    pub const ALL: [FieldGroup; 16] = [
        FieldGroup::BaseData,
        FieldGroup::Vwap,
        FieldGroup::ValueArea,
        FieldGroup::PreviousVwap,
        FieldGroup::VolatilityIndex,
        FieldGroup::Quote,
        FieldGroup::Trade,
        FieldGroup::Depth,
        FieldGroup::OrderFlow,
        FieldGroup::Levels,
        FieldGroup::AverageTrueRange,
        FieldGroup::VolumeNode,
        FieldGroup::PreviousValueArea,
        FieldGroup::CumulativeDelta,
        FieldGroup::Correlation,
        FieldGroup::Extra,
    ];

    /// Key used for this group in the output record.
    pub fn name(self) -> &'static str {
        match self {
            FieldGroup::BaseData => "basedata",
            FieldGroup::Vwap => "vwap",
            FieldGroup::ValueArea => "vva",
            FieldGroup::PreviousVwap => "pvwap",
            FieldGroup::VolatilityIndex => "vix",
            FieldGroup::Quote => "quote",
            FieldGroup::Trade => "trade",
            FieldGroup::Depth => "depth",
            FieldGroup::OrderFlow => "nbcv",
            FieldGroup::Levels => "levels",
            FieldGroup::AverageTrueRange => "atr",
            FieldGroup::VolumeNode => "hvn_lvn",
            FieldGroup::PreviousValueArea => "pvva",
            FieldGroup::CumulativeDelta => "cumulative_delta",
            FieldGroup::Correlation => "correlation",
            FieldGroup::Extra => "extra",
        }
    }

    /// Parse a comma-separated allow-list such as `"vwap, vva,atr"`.
    ///
    /// Empty items are ignored; any unknown name is a configuration error.
    pub fn parse_list(list: &str) -> Result<Vec<FieldGroup>, Error> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(FieldGroup::from_str)
            .collect()
    }
}

impl FromStr for FieldGroup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let group = match lower.as_str() {
            "orderflow" | "order_flow" => FieldGroup::OrderFlow,
            "menthorq" | "price_levels" => FieldGroup::Levels,
            name => FieldGroup::ALL
                .into_iter()
                .find(|g| g.name() == name)
                .ok_or_else(|| {
                    let valid: Vec<&str> = FieldGroup::ALL.iter().map(|g| g.name()).collect();
                    Error::config(format!(
                        "unsupported field group '{name}', valid groups: {}",
                        valid.join(",")
                    ))
                })?,
        };
        Ok(group)
    }
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
