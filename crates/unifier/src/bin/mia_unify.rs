use anyhow::{Context, Result};
use clap::Parser;
use mia_core::{FieldGroup, TimeScale, UnifierConfig};
use mia_unifier::{LevelTypeFilter, Unifier};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Level types kept by `--level-filter` when `--level-types` is not given.
const DEFAULT_LEVEL_TYPES: &str =
    "call_resistance,put_support,hvl,gex_,blind_spot_,1d_min,1d_max";

#[derive(Parser)]
#[command(version, about = "Merge per-kind chart dumps into one time-bucketed JSON-Lines stream")]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Input root directory
    #[arg(long, value_name = "DIR")]
    indir: Option<PathBuf>,

    /// Date to unify (YYYYMMDD or "today")
    #[arg(long)]
    date: Option<String>,

    /// Output file (default: unified_<date>.jsonl next to the inputs)
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Bucket tolerance in seconds
    #[arg(long)]
    tol: Option<f64>,

    /// One bucket per minute (same as --tol 60)
    #[arg(long, conflicts_with = "tol")]
    minute_mode: bool,

    /// Order-book levels kept per side
    #[arg(long)]
    max_depth_levels: Option<u32>,

    /// Unit of input timestamps: fractional_day or seconds
    #[arg(long)]
    time_scale: Option<TimeScale>,

    /// Comma-separated field groups to emit (e.g. "vwap,vva,depth")
    #[arg(long, value_name = "GROUPS")]
    only: Option<String>,

    /// Filter price levels by type
    #[arg(long)]
    level_filter: bool,

    /// Comma-separated level-type prefixes kept by --level-filter
    #[arg(long, value_name = "TYPES", requires = "level_filter")]
    level_types: Option<String>,

    /// Write gzip-compressed output
    #[arg(long)]
    gzip: bool,

    /// Append only buckets newer than the last line of the output
    #[arg(long)]
    append_stream: bool,

    /// Hours added to every input timestamp
    #[arg(long, allow_hyphen_values = true)]
    timezone_offset: Option<f64>,

    /// Re-emit the last price levels into empty buckets for this many seconds
    #[arg(long, value_name = "SECS")]
    levels_ttl: Option<f64>,

    /// Re-emit the last correlation into empty buckets for this many seconds
    #[arg(long, value_name = "SECS")]
    correlation_ttl: Option<f64>,

    /// Rebuild cumulative delta from the order-flow summaries
    #[arg(long)]
    recompute_cumulative_delta: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn into_config(self) -> Result<UnifierConfig> {
        let mut config = match &self.config {
            Some(path) => UnifierConfig::from_toml_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => UnifierConfig::default(),
        };

        if let Some(indir) = self.indir {
            config.input_root = indir;
        }
        if let Some(date) = self.date {
            config.date = date;
        }
        if self.out.is_some() {
            config.output = self.out;
        }
        if let Some(tol) = self.tol {
            config.tolerance_secs = tol;
        }
        if self.minute_mode {
            config.tolerance_secs = 60.0;
        }
        if let Some(levels) = self.max_depth_levels {
            config.max_depth_levels = levels;
        }
        if let Some(scale) = self.time_scale {
            config.time_scale = scale;
        }
        if let Some(only) = &self.only {
            let groups = FieldGroup::parse_list(only).context("parsing --only")?;
            config.include = Some(groups.into_iter().collect());
        }
        if let Some(hours) = self.timezone_offset {
            config.timezone_offset_hours = hours;
        }
        if self.levels_ttl.is_some() {
            config.carry_forward.levels_ttl_secs = self.levels_ttl;
        }
        if self.correlation_ttl.is_some() {
            config.carry_forward.correlation_ttl_secs = self.correlation_ttl;
        }
        config.level_filter |= self.level_filter;
        config.gzip |= self.gzip;
        config.append_stream |= self.append_stream;
        config.recompute_cumulative_delta |= self.recompute_cumulative_delta;
        Ok(config)
    }
}

fn setup_logging(verbose: bool, json: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.log_json);

    let level_types = cli
        .level_types
        .clone()
        .unwrap_or_else(|| DEFAULT_LEVEL_TYPES.to_string());
    let config = cli.into_config()?;

    let prefixes: Vec<String> = level_types
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let unifier = Unifier::new(config)
        .context("invalid configuration")?
        .with_level_filter(Box::new(LevelTypeFilter::new(prefixes)));

    let report = unifier.run().context("unification failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
