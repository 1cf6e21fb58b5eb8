//! Unification pipeline.
//!
//! Read every input of a date, bucket all events in memory, repair
//! orderings, filter price levels, then write one line per bucket.

use crate::carry::CarryForward;
use crate::level_filter::{apply_filter, EmitAll, FilterStats, LevelFilter};
use crate::normalizer::{normalize_bucket, RepairStats};
use crate::serializer::{
    last_written_t, output_path, OutputSink, SerializeOptions, SnapshotSerializer,
};
use mia_core::{Error, Event, FieldGroup, Result, UnifierConfig};
use mia_ingestion::{discover_inputs, organized_dir, read_all, Bucket, BucketTable, ReadStats};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Summary of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnifyReport {
    /// Input files read.
    pub inputs: usize,
    /// Non-blank lines read.
    pub lines_read: u64,
    /// Lines skipped as malformed.
    pub malformed_lines: u64,
    /// Lines skipped for a missing timestamp.
    pub missing_timestamp: u64,
    /// Events folded into buckets.
    pub events: u64,
    /// Depth events dropped (bad side or level out of range).
    pub depth_dropped: u64,
    /// Buckets built.
    pub buckets: usize,
    /// Lines written.
    pub written: u64,
    /// Buckets skipped as already written (append mode).
    pub skipped_existing: u64,
    /// Ordering repairs.
    pub repairs: RepairStats,
    /// Price-level filter outcome.
    pub levels: FilterStats,
    /// Output file.
    pub out: Option<PathBuf>,
    /// Whether the output is gzip-compressed.
    pub gzip: bool,
    /// Emitted groups, when restricted.
    pub only: Option<Vec<FieldGroup>>,
    /// Name of the active level filter, if any.
    pub level_filter: Option<String>,
}

/// The stream unifier.
pub struct Unifier {
    config: UnifierConfig,
    filter: Box<dyn LevelFilter>,
}

impl Unifier {
    /// Create a unifier with the identity level filter.
    pub fn new(config: UnifierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            filter: Box::new(EmitAll),
        })
    }

    /// Use a level filter. It only runs when `level_filter` is enabled in
    /// the configuration.
    pub fn with_level_filter(mut self, filter: Box<dyn LevelFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// The run configuration.
    pub fn config(&self) -> &UnifierConfig {
        &self.config
    }

    /// Default output file for a date: `unified_<date>.jsonl` in the
    /// organized date directory if present, else in the input root.
    pub fn default_output(&self, yyyymmdd: &str) -> PathBuf {
        let organized = organized_dir(&self.config.input_root, yyyymmdd);
        let dir = if organized.is_dir() {
            organized
        } else {
            self.config.input_root.clone()
        };
        dir.join(format!("unified_{yyyymmdd}.jsonl"))
    }

    /// Bucket a sequence of events, shifting timestamps by the configured
    /// timezone offset.
    pub fn accumulate<I>(&self, events: I) -> BucketTable
    where
        I: IntoIterator<Item = Event>,
    {
        let mut table = BucketTable::from_config(&self.config);
        let shift = self.time_shift();
        for mut event in events {
            event.shift_time(shift);
            table.add(event);
        }
        table
    }

    /// Timezone offset in the input's native time unit.
    fn time_shift(&self) -> f64 {
        self.config
            .time_scale
            .hours(self.config.timezone_offset_hours)
    }

    /// Repair orderings and filter price levels of every bucket.
    pub fn finalize(&self, table: BucketTable) -> (Vec<Bucket>, RepairStats, FilterStats) {
        let mut repairs = RepairStats::default();
        let mut levels = FilterStats::default();
        let filter = self.active_filter();

        let buckets = table
            .into_buckets()
            .into_values()
            .map(|mut bucket| {
                repairs.merge(normalize_bucket(&mut bucket));
                match filter {
                    Some(filter) => {
                        let list = std::mem::take(&mut bucket.levels);
                        bucket.levels = apply_filter(list, filter, &mut levels);
                    }
                    None => levels.kept += bucket.levels.len() as u64,
                }
                bucket
            })
            .collect();
        (buckets, repairs, levels)
    }

    fn active_filter(&self) -> Option<&dyn LevelFilter> {
        self.config.level_filter.then_some(&*self.filter)
    }

    fn serializer(&self, append_after: Option<f64>) -> SnapshotSerializer {
        SnapshotSerializer::new(
            SerializeOptions {
                include: self.config.include.clone(),
                time_scale: self.config.time_scale,
                append_after,
                recompute_cumulative_delta: self.config.recompute_cumulative_delta,
            },
            CarryForward::new(&self.config.carry_forward),
        )
    }

    /// Run the whole pipeline over in-memory events, writing to `out`.
    pub fn unify_events<I, W>(&self, events: I, out: &mut W) -> Result<UnifyReport>
    where
        I: IntoIterator<Item = Event>,
        W: Write,
    {
        let table = self.accumulate(events);
        let mut report = self.base_report(&table);
        let (buckets, repairs, levels) = self.finalize(table);

        let mut serializer = self.serializer(None);
        report.written = serializer.write_all(buckets, out)?;
        report.repairs = repairs;
        report.levels = levels;
        Ok(report)
    }

    /// Run over the input files of the configured date.
    ///
    /// Fails with [`Error::NoInput`] before touching the output when no input
    /// file exists for the date.
    pub fn run(&self) -> Result<UnifyReport> {
        let date = self.config.resolved_date()?;
        let root = &self.config.input_root;
        let sources = discover_inputs(root, &date)?;
        if sources.is_empty() {
            return Err(Error::no_input(date, root.clone()));
        }

        let mut table = BucketTable::from_config(&self.config);
        let shift = self.time_shift();
        let read = read_all(&sources, |mut event| {
            event.shift_time(shift);
            table.add(event);
        });

        let mut report = self.base_report(&table);
        report.inputs = sources.len();
        report.lines_read = read.lines;
        report.malformed_lines = read.malformed;
        report.missing_timestamp = read.missing_timestamp;

        let (buckets, repairs, levels) = self.finalize(table);
        report.repairs = repairs;
        report.levels = levels;

        let mut gzip = self.config.gzip;
        let append = self.config.append_stream;
        if append && gzip {
            warn!("append-stream writes plain text, ignoring gzip");
            gzip = false;
        }

        let requested = self
            .config
            .output
            .clone()
            .unwrap_or_else(|| self.default_output(&date));
        let out_path = output_path(&requested, gzip);
        let append_after = if append { last_written_t(&out_path) } else { None };
        debug!(path = %out_path.display(), ?append_after, "writing output");

        let mut serializer = self.serializer(append_after);
        let mut sink = OutputSink::create(&out_path, gzip, append)?;
        report.written = serializer.write_all(buckets, &mut sink)?;
        sink.finish()?;
        report.skipped_existing = serializer.skipped();
        report.out = Some(out_path);
        report.gzip = gzip;

        log_report(&report, &date, read);
        Ok(report)
    }

    fn base_report(&self, table: &BucketTable) -> UnifyReport {
        let stats = table.stats();
        UnifyReport {
            events: stats.events,
            depth_dropped: stats.depth_dropped,
            buckets: table.len(),
            only: self
                .config
                .include
                .as_ref()
                .map(|set| set.iter().copied().collect()),
            level_filter: self
                .active_filter()
                .map(|filter| filter.name().to_string()),
            ..UnifyReport::default()
        }
    }
}

fn log_report(report: &UnifyReport, date: &str, read: ReadStats) {
    info!(
        date,
        inputs = report.inputs,
        lines = read.lines,
        malformed = read.malformed,
        buckets = report.buckets,
        written = report.written,
        value_area_repairs = report.repairs.value_area,
        vwap_band_repairs = report.repairs.vwap_bands,
        out = ?report.out,
        "unified streams"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level_filter::{FilterError, LevelTypeFilter};
    use mia_core::{JsonObject, TimeScale};
    use serde_json::{json, Value};

    fn events(lines: &[Value]) -> Vec<Event> {
        lines
            .iter()
            .map(|line| match line.clone() {
                Value::Object(map) => Event::from_object(map).unwrap(),
                _ => panic!("expected object"),
            })
            .collect()
    }

    fn seconds_config(tol: f64) -> UnifierConfig {
        UnifierConfig {
            tolerance_secs: tol,
            time_scale: TimeScale::Seconds,
            ..UnifierConfig::default()
        }
    }

    fn run(unifier: &Unifier, lines: &[Value]) -> (UnifyReport, Vec<Value>) {
        let mut out = Vec::new();
        let report = unifier.unify_events(events(lines), &mut out).unwrap();
        let parsed = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (report, parsed)
    }

    #[test]
    fn test_value_area_and_bands_repaired_in_one_bucket() {
        let unifier = Unifier::new(seconds_config(0.001)).unwrap();
        let (report, lines) = run(
            &unifier,
            &[
                json!({"t": 0.5, "type": "vva", "vah": 100, "vpoc": 105, "val": 102}),
                json!({"t": 0.50001, "type": "vwap", "v": 101, "up1": 99, "dn1": 103}),
            ],
        );

        assert_eq!(lines.len(), 1);
        let vva = &lines[0]["vva"];
        assert_eq!(
            (&vva["vah"], &vva["vpoc"], &vva["val"]),
            (&json!(105), &json!(102), &json!(100))
        );
        let vwap = &lines[0]["vwap"];
        assert_eq!(
            (&vwap["v"], &vwap["up1"], &vwap["dn1"]),
            (&json!(101), &json!(103), &json!(99))
        );
        assert_eq!(lines[0]["t"], json!(0.5));
        assert_eq!(report.repairs, RepairStats { value_area: 1, vwap_bands: 1 });
    }

    #[test]
    fn test_default_scale_is_fractional_day() {
        // 0.00001 day is 0.864 s, far beyond a 0.2 s tolerance.
        let unifier = Unifier::new(UnifierConfig::default()).unwrap();
        let (_, lines) = run(
            &unifier,
            &[
                json!({"t": 0.5, "type": "vva", "vah": 105, "vpoc": 102, "val": 100}),
                json!({"t": 0.50001, "type": "vwap", "v": 101}),
            ],
        );
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_timezone_offset_shifts_timestamps() {
        let config = UnifierConfig {
            timezone_offset_hours: -6.0,
            ..seconds_config(1.0)
        };
        let unifier = Unifier::new(config).unwrap();
        let (_, lines) = run(&unifier, &[json!({"t": 30_000.0, "type": "trade", "px": 1})]);
        assert_eq!(lines[0]["t"], json!(8_400.0));
        assert_eq!(lines[0]["trade"]["t"], json!(8_400.0));
    }

    #[test]
    fn test_filter_only_runs_when_enabled() {
        let levels = [
            json!({"t": 1.0, "type": "menthorq_level", "level_type": "hvl", "price": 6000.0}),
            json!({"t": 1.0, "type": "menthorq_level", "level_type": "swing_low", "price": 5950.0}),
        ];

        let disabled = Unifier::new(seconds_config(1.0))
            .unwrap()
            .with_level_filter(Box::new(LevelTypeFilter::new(["hvl"])));
        let (report, lines) = run(&disabled, &levels);
        assert_eq!(lines[0]["levels"].as_array().unwrap().len(), 2);
        assert_eq!(report.level_filter, None);

        let config = UnifierConfig {
            level_filter: true,
            ..seconds_config(1.0)
        };
        let enabled = Unifier::new(config)
            .unwrap()
            .with_level_filter(Box::new(LevelTypeFilter::new(["hvl"])));
        let (report, lines) = run(&enabled, &levels);
        assert_eq!(lines[0]["levels"].as_array().unwrap().len(), 1);
        assert_eq!(report.levels.dropped, 1);
        assert_eq!(report.level_filter.as_deref(), Some("level_type"));
    }

    #[test]
    fn test_failing_filter_keeps_everything() {
        let config = UnifierConfig {
            level_filter: true,
            ..seconds_config(1.0)
        };
        let failing =
            |_: &str, _: Option<f64>, _: &JsonObject| -> std::result::Result<bool, FilterError> {
                Err(FilterError("boom".to_string()))
            };
        let unifier = Unifier::new(config).unwrap().with_level_filter(Box::new(failing));
        let (report, lines) = run(
            &unifier,
            &[
                json!({"t": 1.0, "type": "menthorq_level", "price": 6000.0}),
                json!({"t": 1.0, "type": "menthorq_level", "price": 6001.0}),
            ],
        );
        assert_eq!(lines[0]["levels"].as_array().unwrap().len(), 2);
        assert_eq!(report.levels.errors, 2);
    }

    #[test]
    fn test_only_subset_in_report_and_output() {
        let config = UnifierConfig {
            include: Some([FieldGroup::Vwap].into_iter().collect()),
            ..seconds_config(1.0)
        };
        let unifier = Unifier::new(config).unwrap();
        let (report, lines) = run(
            &unifier,
            &[
                json!({"t": 1.0, "type": "vwap", "v": 1}),
                json!({"t": 1.0, "type": "vix", "v": 2}),
            ],
        );
        assert_eq!(report.only, Some(vec![FieldGroup::Vwap]));
        let keys: Vec<&String> = lines[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["t", "vwap"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = UnifierConfig {
            tolerance_secs: -1.0,
            ..UnifierConfig::default()
        };
        assert!(matches!(Unifier::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = UnifierConfig {
            input_root: dir.path().to_path_buf(),
            date: "20250115".to_string(),
            ..UnifierConfig::default()
        };
        let unifier = Unifier::new(config).unwrap();
        assert!(matches!(unifier.run(), Err(Error::NoInput { .. })));
        assert!(!dir.path().join("unified_20250115.jsonl").exists());
    }
}
