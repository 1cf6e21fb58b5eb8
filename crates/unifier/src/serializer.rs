//! Unified snapshot assembly and output.
//!
//! Buckets are written in ascending key order, one JSON object per line.
//! A group that is included but has no data in a bucket is written as
//! `null`; a group outside the allow-list is left out of the line entirely.

use crate::carry::{summary_delta, CarryForward, CumulativeDelta};
use flate2::write::GzEncoder;
use flate2::Compression;
use mia_core::{DepthSide, FieldGroup, JsonObject, Result, TimeScale};
use mia_ingestion::{Bucket, DepthBook, OrderFlowEntry};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Bytes read from the end of an existing output to find its last line.
const TAIL_BYTES: u64 = 64 * 1024;

/// One order-book level in the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthEntry {
    pub level: u32,
    pub price: Option<Value>,
    pub size: Option<Value>,
}

/// Both sides of the book, each ascending by level.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DepthSnapshot {
    #[serde(rename = "BID")]
    pub bid: Vec<DepthEntry>,
    #[serde(rename = "ASK")]
    pub ask: Vec<DepthEntry>,
}

impl From<&DepthBook> for DepthSnapshot {
    fn from(book: &DepthBook) -> Self {
        let side = |side: DepthSide| -> Vec<DepthEntry> {
            book.side(side)
                .iter()
                .map(|(level, value)| DepthEntry {
                    level: *level,
                    price: value.price.clone(),
                    size: value.size.clone(),
                })
                .collect()
        };
        Self {
            bid: side(DepthSide::Bid),
            ask: side(DepthSide::Ask),
        }
    }
}

/// One output line.
///
/// For scalar groups the outer `Option` says whether the group is emitted
/// and the inner one whether the bucket had data for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedSnapshot {
    /// First-seen raw timestamp of the bucket.
    pub t: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basedata: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vva: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvwap: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vix: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<DepthSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbcv: Option<BTreeMap<i64, OrderFlowEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atr: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hvn_lvn: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvva: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative_delta: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Option<JsonObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Vec<JsonObject>>,
}

impl UnifiedSnapshot {
    /// Assemble a snapshot from a finished bucket.
    pub fn from_bucket<F>(mut bucket: Bucket, include: F) -> Self
    where
        F: Fn(FieldGroup) -> bool,
    {
        let mut scalar = |group: FieldGroup| include(group).then(|| bucket.scalars.remove(&group));

        let basedata = scalar(FieldGroup::BaseData);
        let vwap = scalar(FieldGroup::Vwap);
        let vva = scalar(FieldGroup::ValueArea);
        let pvwap = scalar(FieldGroup::PreviousVwap);
        let vix = scalar(FieldGroup::VolatilityIndex);
        let quote = scalar(FieldGroup::Quote);
        let trade = scalar(FieldGroup::Trade);
        let atr = scalar(FieldGroup::AverageTrueRange);
        let hvn_lvn = scalar(FieldGroup::VolumeNode);
        let pvva = scalar(FieldGroup::PreviousValueArea);
        let cumulative_delta = scalar(FieldGroup::CumulativeDelta);
        let correlation = scalar(FieldGroup::Correlation);

        Self {
            t: bucket.first_t,
            basedata,
            vwap,
            vva,
            pvwap,
            vix,
            quote,
            trade,
            depth: include(FieldGroup::Depth).then(|| DepthSnapshot::from(&bucket.depth)),
            nbcv: include(FieldGroup::OrderFlow).then(|| std::mem::take(&mut bucket.order_flow)),
            levels: include(FieldGroup::Levels).then(|| std::mem::take(&mut bucket.levels)),
            atr,
            hvn_lvn,
            pvva,
            cumulative_delta,
            correlation,
            extra: include(FieldGroup::Extra).then(|| std::mem::take(&mut bucket.extra)),
        }
    }
}

/// Settings of the serialization walk.
#[derive(Debug, Clone, Default)]
pub struct SerializeOptions {
    /// Groups to emit; all when `None`.
    pub include: Option<BTreeSet<FieldGroup>>,
    /// Unit of bucket timestamps.
    pub time_scale: TimeScale,
    /// Do not write buckets whose first-seen `t` is not greater than this.
    /// They still advance carry-forward and cumulative-delta state.
    pub append_after: Option<f64>,
    /// Rebuild cumulative delta from order-flow summaries.
    pub recompute_cumulative_delta: bool,
}

/// Writes buckets as unified snapshots, one line each.
pub struct SnapshotSerializer {
    options: SerializeOptions,
    carry: CarryForward,
    cumulative_delta: CumulativeDelta,
    written: u64,
    skipped: u64,
}

impl SnapshotSerializer {
    /// Create a serializer.
    pub fn new(options: SerializeOptions, carry: CarryForward) -> Self {
        Self {
            options,
            carry,
            cumulative_delta: CumulativeDelta::new(),
            written: 0,
            skipped: 0,
        }
    }

    /// Lines written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Buckets skipped because they were already in the output.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn includes(&self, group: FieldGroup) -> bool {
        self.options
            .include
            .as_ref()
            .map_or(true, |set| set.contains(&group))
    }

    /// Turn one bucket into its snapshot, updating cross-bucket state.
    ///
    /// Returns `None` for buckets already written in append mode; their
    /// content still feeds the cross-bucket state so that appended lines
    /// match a full run.
    pub fn snapshot(&mut self, bucket: Bucket) -> Option<UnifiedSnapshot> {
        let time_scale = self.options.time_scale;
        let delta = summary_delta(&bucket.extra);
        let mut snapshot = UnifiedSnapshot::from_bucket(bucket, |group| self.includes(group));

        let now_secs = time_scale.to_seconds(snapshot.t);
        if let Some(levels) = snapshot.levels.as_mut() {
            self.carry.apply_levels(now_secs, levels);
        }
        if let Some(slot) = snapshot.correlation.as_mut() {
            self.carry.apply_correlation(now_secs, slot);
        }
        if self.options.recompute_cumulative_delta {
            if let Some(Some(obj)) = snapshot.cumulative_delta.as_mut() {
                self.cumulative_delta
                    .rewrite(time_scale.day_index(snapshot.t), obj, delta);
            }
        }

        if self
            .options
            .append_after
            .is_some_and(|last| snapshot.t <= last)
        {
            self.skipped += 1;
            return None;
        }
        Some(snapshot)
    }

    /// Write buckets (already in ascending key order) to `out`.
    pub fn write_all<I, W>(&mut self, buckets: I, out: &mut W) -> Result<u64>
    where
        I: IntoIterator<Item = Bucket>,
        W: Write,
    {
        let before = self.written;
        for bucket in buckets {
            let Some(snapshot) = self.snapshot(bucket) else {
                continue;
            };
            serde_json::to_writer(&mut *out, &snapshot)?;
            out.write_all(b"\n")?;
            self.written += 1;
        }
        Ok(self.written - before)
    }
}

/// Output path with `.gz` appended when compressing.
pub fn output_path(path: &Path, gzip: bool) -> PathBuf {
    let has_gz = path.extension().is_some_and(|ext| ext == "gz");
    if gzip && !has_gz {
        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        path.to_path_buf()
    }
}

/// Plain or gzip file sink.
pub enum OutputSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputSink {
    /// Create (or, with `append`, open for appending) an output file.
    pub fn create(path: &Path, gzip: bool, append: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            File::create(path)?
        };
        let writer = BufWriter::new(file);
        Ok(if gzip {
            OutputSink::Gzip(GzEncoder::new(writer, Compression::default()))
        } else {
            OutputSink::Plain(writer)
        })
    }

    /// Flush and, for gzip, write the trailer.
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputSink::Plain(mut w) => w.flush(),
            OutputSink::Gzip(gz) => gz.finish()?.flush(),
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::Plain(w) => w.write(buf),
            OutputSink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputSink::Plain(w) => w.flush(),
            OutputSink::Gzip(w) => w.flush(),
        }
    }
}

/// Timestamp `t` of the last valid line of an existing plain output file.
///
/// Returns `None` when the file is missing, empty or has no parsable line
/// in its tail.
pub fn last_written_t(path: &Path) -> Option<f64> {
    let mut file = File::open(path).ok()?;
    let size = file.metadata().ok()?.len();
    if size == 0 {
        return None;
    }
    let start = size.saturating_sub(TAIL_BYTES);
    file.seek(SeekFrom::Start(start)).ok()?;
    let mut tail = Vec::with_capacity((size - start) as usize);
    file.read_to_end(&mut tail).ok()?;

    String::from_utf8_lossy(&tail)
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| {
            serde_json::from_str::<Value>(line)
                .ok()?
                .get("t")?
                .as_f64()
        })
}
