//! State carried across buckets while serializing in time order.
//!
//! Two sparse groups can be re-emitted into later buckets for a limited
//! time, and cumulative delta can be rebuilt from the order-flow summaries
//! because the study value written by the chart is unreliable with
//! tick-reversal bars.

use mia_core::{CarryForwardConfig, JsonObject};
use serde_json::{Number, Value};

/// Tag of the per-bar order-flow summary events used for delta.
pub const ORDER_FLOW_SUMMARY_TAG: &str = "nbcv";

/// Last non-empty value of a group and when it was seen.
#[derive(Debug, Clone)]
struct Remembered<T> {
    at_secs: f64,
    value: T,
}

/// Re-emits the last price levels / correlation into empty buckets.
#[derive(Debug, Clone, Default)]
pub struct CarryForward {
    levels_ttl_secs: Option<f64>,
    correlation_ttl_secs: Option<f64>,
    levels: Option<Remembered<Vec<JsonObject>>>,
    correlation: Option<Remembered<JsonObject>>,
}

impl CarryForward {
    /// Create from configuration.
    pub fn new(config: &CarryForwardConfig) -> Self {
        Self {
            levels_ttl_secs: config.levels_ttl_secs,
            correlation_ttl_secs: config.correlation_ttl_secs,
            levels: None,
            correlation: None,
        }
    }

    /// Remember non-empty levels, or fill empty ones from memory if fresh.
    ///
    /// Returns true when levels were injected.
    pub fn apply_levels(&mut self, now_secs: f64, levels: &mut Vec<JsonObject>) -> bool {
        let Some(ttl) = self.levels_ttl_secs else {
            return false;
        };
        if !levels.is_empty() {
            self.levels = Some(Remembered {
                at_secs: now_secs,
                value: levels.clone(),
            });
            return false;
        }
        match &self.levels {
            Some(last) if now_secs - last.at_secs <= ttl => {
                levels.clone_from(&last.value);
                true
            }
            _ => false,
        }
    }

    /// Same as [`CarryForward::apply_levels`] for the correlation group.
    pub fn apply_correlation(&mut self, now_secs: f64, slot: &mut Option<JsonObject>) -> bool {
        let Some(ttl) = self.correlation_ttl_secs else {
            return false;
        };
        if let Some(current) = slot {
            self.correlation = Some(Remembered {
                at_secs: now_secs,
                value: current.clone(),
            });
            return false;
        }
        match &self.correlation {
            Some(last) if now_secs - last.at_secs <= ttl => {
                *slot = Some(last.value.clone());
                true
            }
            _ => false,
        }
    }
}

/// Delta of the most recent order-flow summary in a passthrough list:
/// `ask_volume - bid_volume`, or 0 when there is none.
pub fn summary_delta(extra: &[JsonObject]) -> f64 {
    extra
        .iter()
        .rev()
        .find(|obj| obj.get("type").and_then(Value::as_str) == Some(ORDER_FLOW_SUMMARY_TAG))
        .map(|obj| {
            let ask = obj.get("ask_volume").and_then(Value::as_f64).unwrap_or(0.0);
            let bid = obj.get("bid_volume").and_then(Value::as_f64).unwrap_or(0.0);
            ask - bid
        })
        .unwrap_or(0.0)
}

/// Running cumulative delta, reset at each new day.
#[derive(Debug, Clone, Default)]
pub struct CumulativeDelta {
    running: f64,
    day: Option<i64>,
    seeded: bool,
}

impl CumulativeDelta {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current running value.
    pub fn value(&self) -> f64 {
        self.running
    }

    /// Advance by one bucket and return the new running value.
    ///
    /// After a reset the first non-zero upstream `close` seeds the total.
    pub fn update(&mut self, day: i64, upstream_close: Option<f64>, delta: f64) -> f64 {
        if self.day != Some(day) {
            self.day = Some(day);
            self.running = 0.0;
            self.seeded = false;
        }
        if !self.seeded {
            if let Some(close) = upstream_close.filter(|c| *c != 0.0) {
                self.running = close;
                self.seeded = true;
            }
        }
        self.running += delta;
        self.running
    }

    /// Rewrite `close` and `delta` of a cumulative-delta object.
    pub fn rewrite(&mut self, day: i64, obj: &mut JsonObject, delta: f64) {
        let upstream = obj.get("close").and_then(Value::as_f64);
        let close = self.update(day, upstream, delta);
        for (key, value) in [("close", close), ("delta", delta)] {
            if let Some(n) = Number::from_f64(value) {
                obj.insert(key.to_string(), Value::Number(n));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn carry(levels: Option<f64>, correlation: Option<f64>) -> CarryForward {
        CarryForward::new(&CarryForwardConfig {
            levels_ttl_secs: levels,
            correlation_ttl_secs: correlation,
        })
    }

    #[test]
    fn test_levels_carried_within_ttl() {
        let mut cf = carry(Some(900.0), None);
        let seen = vec![object(json!({"price": 6000.0}))];

        let mut first = seen.clone();
        assert!(!cf.apply_levels(100.0, &mut first));

        let mut empty = Vec::new();
        assert!(cf.apply_levels(1000.0, &mut empty));
        assert_eq!(empty, seen);

        let mut expired = Vec::new();
        assert!(!cf.apply_levels(1000.5, &mut expired));
        assert!(expired.is_empty());
    }

    #[test]
    fn test_carry_disabled() {
        let mut cf = carry(None, None);
        let mut first = vec![object(json!({"price": 6000.0}))];
        cf.apply_levels(0.0, &mut first);
        let mut empty = Vec::new();
        assert!(!cf.apply_levels(1.0, &mut empty));

        let mut slot = Some(object(json!({"cc": 0.8})));
        cf.apply_correlation(0.0, &mut slot);
        let mut none = None;
        assert!(!cf.apply_correlation(1.0, &mut none));
        assert!(none.is_none());
    }

    #[test]
    fn test_correlation_carried() {
        let mut cf = carry(None, Some(120.0));
        let mut slot = Some(object(json!({"type": "correlation", "cc": -0.42})));
        assert!(!cf.apply_correlation(10.0, &mut slot));

        let mut next = None;
        assert!(cf.apply_correlation(130.0, &mut next));
        assert_eq!(next.unwrap()["cc"], json!(-0.42));

        let mut late = None;
        assert!(!cf.apply_correlation(131.0, &mut late));
    }

    #[test]
    fn test_summary_delta_uses_last_summary() {
        let extra = vec![
            object(json!({"type": "nbcv", "ask_volume": 10, "bid_volume": 4})),
            object(json!({"type": "vwap_diag"})),
            object(json!({"type": "nbcv", "ask_volume": 3, "bid_volume": 8})),
        ];
        assert_relative_eq!(summary_delta(&extra), -5.0);
        assert_relative_eq!(summary_delta(&extra[1..2]), 0.0);
    }

    #[test]
    fn test_cumulative_delta_seed_and_reset() {
        let mut cd = CumulativeDelta::new();
        // Zero upstream does not seed.
        assert_relative_eq!(cd.update(1, Some(0.0), 5.0), 5.0);
        // First non-zero upstream replaces the running total once.
        assert_relative_eq!(cd.update(1, Some(1000.0), 2.0), 1002.0);
        assert_relative_eq!(cd.update(1, Some(-50.0), -3.0), 999.0);
        // New day starts over.
        assert_relative_eq!(cd.update(2, None, 7.0), 7.0);
        assert_relative_eq!(cd.value(), 7.0);
    }

    #[test]
    fn test_rewrite_replaces_fields() {
        let mut cd = CumulativeDelta::new();
        let mut obj = object(json!({"type": "cumulative_delta", "close": 250.0, "open": 1.0}));
        cd.rewrite(0, &mut obj, 12.0);
        assert_eq!(obj["close"], json!(262.0));
        assert_eq!(obj["delta"], json!(12.0));
        assert_eq!(obj["open"], json!(1.0));
    }
}
