//! Ordering repairs for value-area and VWAP-band fields.
//!
//! Upstream studies occasionally write a value area whose high/POC/low are
//! out of order, or VWAP bands with upper below lower. Both are fixed by
//! reordering the values already present; nothing is dropped or invented.

use mia_core::{FieldGroup, JsonObject};
use mia_ingestion::Bucket;
use ordered_float::OrderedFloat;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Reverse;

/// Value-area fields, highest first.
pub const VALUE_AREA_FIELDS: [&str; 3] = ["vah", "vpoc", "val"];

/// Upper/lower VWAP band pairs (±1σ, ±2σ, ±3σ).
pub const VWAP_BAND_PAIRS: [(&str, &str); 3] = [("up1", "dn1"), ("up2", "dn2"), ("up3", "dn3")];

/// Groups carrying a value-area triple.
const VALUE_AREA_GROUPS: [FieldGroup; 2] = [FieldGroup::ValueArea, FieldGroup::PreviousValueArea];

/// Groups carrying VWAP bands.
const VWAP_GROUPS: [FieldGroup; 2] = [FieldGroup::Vwap, FieldGroup::PreviousVwap];

/// Number of repairs made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    /// Value-area triples reordered.
    pub value_area: u64,
    /// VWAP band pairs swapped.
    pub vwap_bands: u64,
}

impl RepairStats {
    /// Add another set of counters.
    pub fn merge(&mut self, other: RepairStats) {
        self.value_area += other.value_area;
        self.vwap_bands += other.vwap_bands;
    }

    /// Total repairs.
    pub fn total(&self) -> u64 {
        self.value_area + self.vwap_bands
    }
}

/// Sort `vah`, `vpoc`, `val` into descending order.
///
/// Only applies when all three are present and strictly positive. Returns
/// whether anything moved.
pub fn repair_value_area(obj: &mut JsonObject) -> bool {
    let mut triple = Vec::with_capacity(3);
    for name in VALUE_AREA_FIELDS {
        match obj.get(name).and_then(Value::as_f64) {
            Some(v) if v > 0.0 && v.is_finite() => triple.push(v),
            _ => return false,
        }
    }
    if triple[0] >= triple[1] && triple[1] >= triple[2] {
        return false;
    }

    // Move the original JSON values so integers stay integers.
    let mut values: Vec<(f64, Value)> = VALUE_AREA_FIELDS
        .iter()
        .zip(triple)
        .filter_map(|(name, v)| obj.remove(*name).map(|value| (v, value)))
        .collect();
    values.sort_by_key(|(v, _)| Reverse(OrderedFloat(*v)));

    for (name, (_, value)) in VALUE_AREA_FIELDS.iter().zip(values) {
        obj.insert((*name).to_string(), value);
    }
    true
}

/// Swap each band pair whose upper value is below its lower value.
///
/// Returns the number of pairs swapped.
pub fn repair_vwap_bands(obj: &mut JsonObject) -> u64 {
    let mut swapped = 0;
    for (up_key, dn_key) in VWAP_BAND_PAIRS {
        let up = obj.get(up_key).and_then(Value::as_f64);
        let dn = obj.get(dn_key).and_then(Value::as_f64);
        let (Some(up), Some(dn)) = (up, dn) else {
            continue;
        };
        if up < dn {
            if let (Some(up_value), Some(dn_value)) = (obj.remove(up_key), obj.remove(dn_key)) {
                obj.insert(up_key.to_string(), dn_value);
                obj.insert(dn_key.to_string(), up_value);
                swapped += 1;
            }
        }
    }
    swapped
}

/// Apply both repairs to a bucket's accumulated scalar groups.
pub fn normalize_bucket(bucket: &mut Bucket) -> RepairStats {
    let mut stats = RepairStats::default();
    for group in VALUE_AREA_GROUPS {
        if let Some(obj) = bucket.scalar_mut(group) {
            if repair_value_area(obj) {
                stats.value_area += 1;
            }
        }
    }
    for group in VWAP_GROUPS {
        if let Some(obj) = bucket.scalar_mut(group) {
            stats.vwap_bands += repair_vwap_bands(obj);
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use mia_core::{Event, TimeScale};
    use mia_ingestion::{BucketAssigner, BucketTable};
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_value_area_reordered() {
        let mut vva = object(json!({"t": 0.5, "type": "vva", "vah": 100, "vpoc": 105, "val": 102}));
        assert!(repair_value_area(&mut vva));
        assert_eq!(vva["vah"], json!(105));
        assert_eq!(vva["vpoc"], json!(102));
        assert_eq!(vva["val"], json!(100));
        assert_eq!(vva["type"], json!("vva"));
    }

    #[test]
    fn test_value_area_already_ordered() {
        let mut vva = object(json!({"vah": 105.0, "vpoc": 105.0, "val": 100.0}));
        let before = vva.clone();
        assert!(!repair_value_area(&mut vva));
        assert_eq!(vva, before);
    }

    #[test]
    fn test_value_area_skipped_when_incomplete_or_non_positive() {
        let mut missing = object(json!({"vah": 100.0, "val": 102.0}));
        assert!(!repair_value_area(&mut missing));
        assert_eq!(missing["vah"], json!(100.0));

        let mut zero = object(json!({"vah": 0.0, "vpoc": 105.0, "val": 102.0}));
        assert!(!repair_value_area(&mut zero));
        assert_eq!(zero["vah"], json!(0.0));

        let mut text = object(json!({"vah": "100", "vpoc": 105.0, "val": 102.0}));
        assert!(!repair_value_area(&mut text));
    }

    #[test]
    fn test_value_area_repair_is_idempotent() {
        let mut vva = object(json!({"vah": 1.0, "vpoc": 3.0, "val": 2.0}));
        assert!(repair_value_area(&mut vva));
        let once = vva.clone();
        assert!(!repair_value_area(&mut vva));
        assert_eq!(vva, once);
    }

    #[test]
    fn test_vwap_bands_swapped() {
        let mut vwap = object(json!({
            "v": 101, "up1": 99, "dn1": 103, "up2": 110, "dn2": 90, "up3": 80.5
        }));
        assert_eq!(repair_vwap_bands(&mut vwap), 1);
        assert_eq!(vwap["up1"], json!(103));
        assert_eq!(vwap["dn1"], json!(99));
        assert_eq!(vwap["up2"], json!(110));
        assert_eq!(vwap["dn2"], json!(90));
        // Lone band is left alone.
        assert_eq!(vwap["up3"], json!(80.5));
        assert!(vwap.get("dn3").is_none());
        assert_eq!(vwap["v"], json!(101));
    }

    #[test]
    fn test_vwap_equal_bands_untouched() {
        let mut vwap = object(json!({"up1": 100.0, "dn1": 100.0}));
        assert_eq!(repair_vwap_bands(&mut vwap), 0);
    }

    #[test]
    fn test_normalize_bucket_counts() {
        let mut table = BucketTable::new(BucketAssigner::new(0.001, TimeScale::Seconds), 20);
        for line in [
            json!({"t": 0.5, "type": "vva", "vah": 100, "vpoc": 105, "val": 102}),
            json!({"t": 0.5, "type": "pvva", "vah": 90, "vpoc": 95, "val": 99}),
            json!({
                "t": 0.50001, "type": "vwap", "v": 101, "up1": 99, "dn1": 103, "up3": 1, "dn3": 2
            }),
        ] {
            table.add(Event::from_object(object(line)).unwrap());
        }
        let mut buckets: Vec<Bucket> = table.into_buckets().into_values().collect();
        assert_eq!(buckets.len(), 1);

        let stats = normalize_bucket(&mut buckets[0]);
        assert_eq!(stats.value_area, 2);
        assert_eq!(stats.vwap_bands, 2);
        assert_eq!(stats.total(), 4);

        let pvva = buckets[0].scalar(FieldGroup::PreviousValueArea).unwrap();
        assert_eq!(pvva["vah"], json!(99));
        assert_eq!(pvva["val"], json!(90));
    }
}
