//! Input discovery and lazy JSON-Lines reading.
//!
//! Each chart dump is one file per (chart, kind, date), named
//! `chart_<id>_<kind>_<YYYYMMDD>.jsonl`. Files live either in the organized
//! tree written by the chart dumper or directly under the input root.

use mia_core::{Event, JsonObject};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Upper-case French month names used by the organized data tree.
const MONTH_NAMES: [&str; 12] = [
    "JANVIER", "FEVRIER", "MARS", "AVRIL", "MAI", "JUIN", "JUILLET", "AOUT", "SEPTEMBRE",
    "OCTOBRE", "NOVEMBRE", "DECEMBRE",
];

/// Directory name for a month number (1-12).
pub fn month_dir_name(month: u32) -> &'static str {
    month
        .checked_sub(1)
        .and_then(|i| MONTH_NAMES.get(i as usize))
        .copied()
        .unwrap_or("INCONNU")
}

/// Organized data directory for a date:
/// `<root>/DATA_SIERRA_CHART/DATA_<yyyy>/<MONTH>/<yyyymmdd>`.
pub fn organized_dir(root: &Path, yyyymmdd: &str) -> PathBuf {
    let year = yyyymmdd.get(..4).unwrap_or("0000");
    let month = yyyymmdd
        .get(4..6)
        .and_then(|m| m.parse::<u32>().ok())
        .unwrap_or(0);
    root.join("DATA_SIERRA_CHART")
        .join(format!("DATA_{year}"))
        .join(month_dir_name(month))
        .join(yyyymmdd)
}

/// Split `chart_<id>_<kind>_<date>.jsonl` into chart id and kind.
pub fn parse_source_name(file_name: &str, yyyymmdd: &str) -> Option<(u32, String)> {
    let stem = file_name
        .strip_prefix("chart_")?
        .strip_suffix(".jsonl")?
        .strip_suffix(yyyymmdd)?
        .strip_suffix('_')?;
    let (id, kind) = stem.split_once('_')?;
    if kind.is_empty() {
        return None;
    }
    Some((id.parse().ok()?, kind.to_string()))
}

/// One per-chart, per-kind input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSource {
    /// Chart number.
    pub chart: u32,
    /// Kind segment of the file name (e.g. `vwap`, `depth`).
    pub kind: String,
    /// File location.
    pub path: PathBuf,
}

impl InputSource {
    /// Open a fresh reader over the file. Each call starts from the top.
    pub fn events(&self) -> io::Result<JsonlReader<BufReader<File>>> {
        let file = File::open(&self.path)?;
        Ok(JsonlReader::new(BufReader::new(file)))
    }
}

/// Find all input files for a date.
///
/// The organized tree (including its `CHART_<n>` subdirectories) is searched
/// before the root; when both hold the same (chart, kind) the organized file
/// wins. Sources come back ordered by chart id, then kind.
pub fn discover_inputs(root: &Path, yyyymmdd: &str) -> io::Result<Vec<InputSource>> {
    let organized = organized_dir(root, yyyymmdd);

    let mut dirs = Vec::new();
    if organized.is_dir() {
        let mut chart_dirs: Vec<PathBuf> = fs::read_dir(&organized)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("CHART_"))
            })
            .collect();
        chart_dirs.sort();
        dirs.extend(chart_dirs);
        dirs.push(organized);
    }
    if root.is_dir() {
        dirs.push(root.to_path_buf());
    }

    let mut sources: BTreeMap<(u32, String), InputSource> = BTreeMap::new();
    for dir in dirs {
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        entries.sort();

        for path in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((chart, kind)) = parse_source_name(name, yyyymmdd) else {
                continue;
            };
            sources
                .entry((chart, kind.clone()))
                .or_insert_with(|| InputSource { chart, kind, path });
        }
    }

    Ok(sources.into_values().collect())
}

/// Counters kept while reading one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Non-blank lines seen.
    pub lines: u64,
    /// Lines that were not a single JSON object.
    pub malformed: u64,
    /// Objects without a usable `t`.
    pub missing_timestamp: u64,
}

impl ReadStats {
    /// Add another set of counters.
    pub fn merge(&mut self, other: &ReadStats) {
        self.lines += other.lines;
        self.malformed += other.malformed;
        self.missing_timestamp += other.missing_timestamp;
    }
}

/// Lazy reader producing one [`Event`] per valid line.
///
/// Blank lines are ignored. Lines that do not parse as a JSON object, and
/// objects without a timestamp, are counted and skipped. A read error ends
/// the sequence.
pub struct JsonlReader<R> {
    reader: R,
    buf: Vec<u8>,
    stats: ReadStats,
    done: bool,
}

impl<R: BufRead> JsonlReader<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(512),
            stats: ReadStats::default(),
            done: false,
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    fn parse_line(&mut self) -> Option<Event> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        self.stats.lines += 1;

        let object: JsonObject = match serde_json::from_slice::<Value>(&self.buf) {
            Ok(Value::Object(map)) => map,
            _ => {
                self.stats.malformed += 1;
                return None;
            }
        };

        match Event::from_object(object) {
            Some(event) => Some(event),
            None => {
                self.stats.missing_timestamp += 1;
                None
            }
        }
    }
}

impl<R: BufRead> Iterator for JsonlReader<R> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    if let Some(event) = self.parse_line() {
                        return Some(event);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "read error, stopping this input");
                    self.done = true;
                }
            }
        }
        None
    }
}

/// Read every source in order, handing each event to `sink`.
///
/// Sources that cannot be opened are logged and skipped.
pub fn read_all<F>(sources: &[InputSource], mut sink: F) -> ReadStats
where
    F: FnMut(Event),
{
    let mut total = ReadStats::default();
    for source in sources {
        let mut reader = match source.events() {
            Ok(reader) => reader,
            Err(e) => {
                warn!(path = %source.path.display(), error = %e, "cannot open input");
                continue;
            }
        };
        for event in reader.by_ref() {
            sink(event);
        }
        let stats = reader.stats();
        debug!(
            path = %source.path.display(),
            chart = source.chart,
            kind = %source.kind,
            lines = stats.lines,
            malformed = stats.malformed,
            "read input"
        );
        total.merge(&stats);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use mia_core::EventKind;
    use std::io::Cursor;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_parse_source_name() {
        assert_eq!(
            parse_source_name("chart_3_vwap_20250115.jsonl", "20250115"),
            Some((3, "vwap".to_string()))
        );
        assert_eq!(
            parse_source_name("chart_3_cumulative_delta_20250115.jsonl", "20250115"),
            Some((3, "cumulative_delta".to_string()))
        );
        assert_eq!(parse_source_name("chart_3_vwap_20250116.jsonl", "20250115"), None);
        assert_eq!(parse_source_name("chart_x_vwap_20250115.jsonl", "20250115"), None);
        assert_eq!(parse_source_name("unified_20250115.jsonl", "20250115"), None);
        assert_eq!(parse_source_name("chart_3_20250115.jsonl", "20250115"), None);
    }

    #[test]
    fn test_organized_dir() {
        let dir = organized_dir(Path::new("/data"), "20250815");
        assert_eq!(
            dir,
            PathBuf::from("/data/DATA_SIERRA_CHART/DATA_2025/AOUT/20250815")
        );
        assert_eq!(month_dir_name(13), "INCONNU");
    }

    #[test]
    fn test_reader_skips_bad_lines() {
        let text = concat!(
            "{\"t\":1.0,\"type\":\"vwap\",\"v\":100}\n",
            "\n",
            "{\"t\":1.1,\"type\":\"vwap\",\"v\":\n",
            "[1,2,3]\n",
            "{\"type\":\"vwap\",\"v\":101}\n",
            "{\"t\":1.2,\"type\":\"trade\",\"px\":100.25}\r\n",
        );
        let mut reader = JsonlReader::new(Cursor::new(text.as_bytes()));
        let events: Vec<Event> = reader.by_ref().collect();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Vwap);
        assert_eq!(events[1].kind, EventKind::Trade);

        let stats = reader.stats();
        assert_eq!(stats.lines, 5);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.missing_timestamp, 1);
    }

    #[test]
    fn test_reader_invalid_utf8_is_malformed() {
        let mut bytes = b"{\"t\":1.0,\"type\":\"vix\",\"v\":\"".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b"\"}\n{\"t\":2.0,\"type\":\"vix\",\"v\":15.2}\n");

        let mut reader = JsonlReader::new(Cursor::new(bytes));
        let events: Vec<Event> = reader.by_ref().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(reader.stats().malformed, 1);
    }

    #[test]
    fn test_discover_prefers_organized_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let date = "20250115";
        let organized = organized_dir(root, date);

        write(&organized.join("CHART_3").join("chart_3_vwap_20250115.jsonl"), "{}\n");
        write(&organized.join("CHART_8").join("chart_8_vix_20250115.jsonl"), "{}\n");
        write(&root.join("chart_3_vwap_20250115.jsonl"), "{}\n");
        write(&root.join("chart_3_depth_20250115.jsonl"), "{}\n");
        write(&root.join("chart_3_depth_20250114.jsonl"), "{}\n");
        write(&root.join("notes.txt"), "x");

        let sources = discover_inputs(root, date).unwrap();
        let keys: Vec<(u32, &str)> = sources.iter().map(|s| (s.chart, s.kind.as_str())).collect();
        assert_eq!(keys, vec![(3, "depth"), (3, "vwap"), (8, "vix")]);

        let vwap = &sources[1];
        assert!(vwap.path.starts_with(&organized));
    }

    #[test]
    fn test_discover_empty_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_inputs(tmp.path(), "20250115").unwrap().is_empty());
    }

    #[test]
    fn test_source_is_restartable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chart_3_vwap_20250115.jsonl");
        write(&path, "{\"t\":1.0,\"type\":\"vwap\"}\n{\"t\":2.0,\"type\":\"vwap\"}\n");
        let source = InputSource {
            chart: 3,
            kind: "vwap".to_string(),
            path,
        };

        assert_eq!(source.events().unwrap().count(), 2);
        assert_eq!(source.events().unwrap().count(), 2);

        let mut seen = Vec::new();
        let stats = read_all(&[source], |e| seen.push(e.t));
        assert_eq!(seen, vec![1.0, 2.0]);
        assert_eq!(stats.lines, 2);
    }
}
