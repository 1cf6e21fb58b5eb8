//! Time bucketing of heterogeneous events.
//!
//! Every event is quantized onto a common time axis and folded into the
//! bucket for its key. Scalar kinds keep the last event seen; depth and
//! order flow are keyed tables; price levels and passthrough events are
//! appended in arrival order.

use mia_core::{
    BucketKey, DepthLevel, DepthSide, Event, EventKind, FieldGroup, JsonObject, OrderFlowPart,
    TimeScale, UnifierConfig,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Maps event timestamps to bucket keys.
#[derive(Debug, Clone, Copy)]
pub struct BucketAssigner {
    tolerance_secs: f64,
    time_scale: TimeScale,
}

impl BucketAssigner {
    /// Create an assigner for a bucket width in seconds.
    pub fn new(tolerance_secs: f64, time_scale: TimeScale) -> Self {
        Self {
            tolerance_secs,
            time_scale,
        }
    }

    /// `round(t_secs / tol) * tol`, as an exact key.
    #[inline]
    pub fn assign(&self, event: &Event) -> BucketKey {
        self.key_for(event.t)
    }

    /// Key for a raw timestamp in the input's native scale.
    #[inline]
    pub fn key_for(&self, t: f64) -> BucketKey {
        BucketKey::from_seconds(self.time_scale.to_seconds(t), self.tolerance_secs)
    }
}

/// Two-sided order book snapshot, levels ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthBook {
    bid: BTreeMap<u32, DepthLevel>,
    ask: BTreeMap<u32, DepthLevel>,
}

impl DepthBook {
    /// Replace one level.
    pub fn set(&mut self, side: DepthSide, level: u32, value: DepthLevel) {
        self.side_mut(side).insert(level, value);
    }

    /// Levels of one side.
    pub fn side(&self, side: DepthSide) -> &BTreeMap<u32, DepthLevel> {
        match side {
            DepthSide::Bid => &self.bid,
            DepthSide::Ask => &self.ask,
        }
    }

    fn side_mut(&mut self, side: DepthSide) -> &mut BTreeMap<u32, DepthLevel> {
        match side {
            DepthSide::Bid => &mut self.bid,
            DepthSide::Ask => &mut self.ask,
        }
    }

    /// True when neither side has a level.
    pub fn is_empty(&self) -> bool {
        self.bid.is_empty() && self.ask.is_empty()
    }
}

/// The three order-flow sub-streams for one bar index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderFlowEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footprint: Option<JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orderflow: Option<JsonObject>,
}

impl OrderFlowEntry {
    /// Replace one sub-stream.
    pub fn set(&mut self, part: OrderFlowPart, payload: JsonObject) {
        let slot = match part {
            OrderFlowPart::Footprint => &mut self.footprint,
            OrderFlowPart::Metrics => &mut self.metrics,
            OrderFlowPart::Orderflow => &mut self.orderflow,
        };
        *slot = Some(payload);
    }
}

/// Accumulated state for one time bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Raw timestamp of the first event that landed here.
    pub first_t: f64,
    /// Latest event of each scalar kind.
    pub scalars: BTreeMap<FieldGroup, JsonObject>,
    /// Order book by side and level.
    pub depth: DepthBook,
    /// Order flow by bar index.
    pub order_flow: BTreeMap<i64, OrderFlowEntry>,
    /// Price-level annotations, arrival order.
    pub levels: Vec<JsonObject>,
    /// Unrecognized events, arrival order.
    pub extra: Vec<JsonObject>,
}

impl Bucket {
    fn new(first_t: f64) -> Self {
        Self {
            first_t,
            scalars: BTreeMap::new(),
            depth: DepthBook::default(),
            order_flow: BTreeMap::new(),
            levels: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Latest event of a scalar group.
    #[inline]
    pub fn scalar(&self, group: FieldGroup) -> Option<&JsonObject> {
        self.scalars.get(&group)
    }

    /// Mutable access to a scalar group.
    #[inline]
    pub fn scalar_mut(&mut self, group: FieldGroup) -> Option<&mut JsonObject> {
        self.scalars.get_mut(&group)
    }
}

/// Counters kept while accumulating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulateStats {
    /// Events folded into buckets.
    pub events: u64,
    /// Depth events dropped for a bad side or an out-of-range level.
    pub depth_dropped: u64,
    /// Distinct symbols seen.
    pub symbols: BTreeSet<String>,
}

/// In-memory table of all buckets of a run, ordered by key.
///
/// Buckets are keyed by quantized time only; input is assumed to carry a
/// single instrument per run.
#[derive(Debug, Clone)]
pub struct BucketTable {
    assigner: BucketAssigner,
    max_depth_levels: u32,
    buckets: BTreeMap<BucketKey, Bucket>,
    stats: AccumulateStats,
}

impl BucketTable {
    /// Create an empty table.
    pub fn new(assigner: BucketAssigner, max_depth_levels: u32) -> Self {
        Self {
            assigner,
            max_depth_levels,
            buckets: BTreeMap::new(),
            stats: AccumulateStats::default(),
        }
    }

    /// Create an empty table from a run configuration.
    pub fn from_config(config: &UnifierConfig) -> Self {
        Self::new(
            BucketAssigner::new(config.tolerance_secs, config.time_scale),
            config.max_depth_levels,
        )
    }

    /// Assign an event to its bucket and fold it in.
    pub fn add(&mut self, event: Event) -> BucketKey {
        let key = self.assigner.assign(&event);
        self.accumulate(key, event);
        key
    }

    /// Fold an event into the bucket for `key`, creating it if needed.
    ///
    /// Never fails: events with unusable routing fields are dropped and
    /// counted.
    pub fn accumulate(&mut self, key: BucketKey, event: Event) {
        self.stats.events += 1;
        if let Some(symbol) = &event.symbol {
            if !self.stats.symbols.contains(symbol) {
                if !self.stats.symbols.is_empty() {
                    warn!(
                        symbol = %symbol,
                        known = ?self.stats.symbols,
                        "several symbols in one run, buckets are keyed by time only"
                    );
                }
                self.stats.symbols.insert(symbol.clone());
            }
        }

        let max_depth_levels = self.max_depth_levels;
        let bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(event.t));

        if let Some(group) = event.kind.scalar_group() {
            bucket.scalars.insert(group, event.raw);
            return;
        }

        match event.kind {
            EventKind::Depth => {
                let side = event.str_field("side").and_then(DepthSide::from_tag);
                let level = event
                    .i64_field("lvl")
                    .filter(|lvl| (1..=i64::from(max_depth_levels)).contains(lvl));
                match (side, level) {
                    (Some(side), Some(level)) => {
                        let value = DepthLevel {
                            price: event.field("price").cloned(),
                            size: event.field("size").cloned(),
                        };
                        bucket.depth.set(side, level as u32, value);
                    }
                    _ => self.stats.depth_dropped += 1,
                }
            }
            EventKind::OrderFlow(part) => {
                let bar = event.i64_field("i").unwrap_or(-1);
                bucket.order_flow.entry(bar).or_default().set(part, event.raw);
            }
            EventKind::PriceLevel => bucket.levels.push(event.raw),
            _ => bucket.extra.push(event.raw),
        }
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True when no event has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Bucket for a key.
    pub fn get(&self, key: BucketKey) -> Option<&Bucket> {
        self.buckets.get(&key)
    }

    /// Buckets in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&BucketKey, &Bucket)> {
        self.buckets.iter()
    }

    /// Accumulation counters.
    pub fn stats(&self) -> &AccumulateStats {
        &self.stats
    }

    /// Consume the table, yielding buckets in ascending key order.
    pub fn into_buckets(self) -> BTreeMap<BucketKey, Bucket> {
        self.buckets
    }
}
