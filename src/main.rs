//! Wavebank CLI
//!
//! Command-line interface for a bank:
//! - Update or rebuild the index
//! - Fetch series by identifier pattern and time range
//! - List index entries and show status
//! - Generate a default config file

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wavebank::config::{Config, LoggingConfig};
use wavebank::index::LogProgress;
use wavebank::query::MergePolicy;
use wavebank::storage::types::{from_datetime, to_datetime};
use wavebank::storage::{Bank, BankConfig, IndexEntry, Series};

#[derive(Parser)]
#[command(name = "wavebank")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Index and query a directory tree of time-stamped data files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Bank root directory (overrides the config file)
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring the index up to date with the file tree
    Index {
        /// Only consider files modified after this time (RFC 3339 or nanoseconds)
        #[arg(long)]
        since: Option<String>,
        /// Drop the index and rebuild it from scratch
        #[arg(long)]
        rebuild: bool,
    },

    /// Fetch series matching identifier patterns
    Get {
        /// Patterns such as UU.SRU..HHZ or UU.*.*.HH?
        #[arg(required = true)]
        patterns: Vec<String>,
        /// Range start (RFC 3339 or nanoseconds)
        #[arg(short, long)]
        start: String,
        /// Range end (RFC 3339 or nanoseconds)
        #[arg(short, long)]
        end: String,
        /// Join across gaps, filling missing samples with this value
        #[arg(long)]
        fill: Option<f64>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// List index entries
    Entries {
        /// Identifier pattern (default: everything)
        pattern: Option<String>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Show what the index holds
    Status,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);

    let root = cli
        .root
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.bank.root));
    let mut bank_config = BankConfig::from(&config.bank);

    match cli.command {
        Commands::Index { since, rebuild } => {
            let bank = Bank::builder(&root).config(bank_config).build();
            let mut progress = LogProgress::new(bank.config().progress_min_files);
            let report = if rebuild {
                bank.rebuild_index(&mut progress)?
            } else {
                let since = since.as_deref().map(parse_time).transpose()?;
                bank.update_index_with(since.map(to_datetime), &mut progress)?
            };

            println!(
                "Scanned {} files: {} changed, {} indexed, {} removed, {} entries written",
                report.files_seen,
                report.files_changed,
                report.files_indexed,
                report.files_removed,
                report.entries_written
            );
            for warning in &report.warnings {
                println!("  warning: {}", warning);
            }
            if !report.committed {
                println!("Index already up to date");
            }
        }

        Commands::Get {
            patterns,
            start,
            end,
            fill,
            format,
        } => {
            if let Some(value) = fill {
                bank_config.merge = MergePolicy::FillGaps(value);
            }
            let bank = Bank::builder(&root).config(bank_config).build();
            let series = bank.get(&patterns, parse_time(&start)?, parse_time(&end)?)?;
            print_series(&series, format)?;
        }

        Commands::Entries { pattern, format } => {
            let bank = Bank::builder(&root).config(bank_config).build();
            let entries = bank.read_index(pattern.as_deref(), None)?;
            print_entries(&entries, format)?;
        }

        Commands::Status => {
            let bank = Bank::builder(&root).config(bank_config).build();
            println!("Wavebank v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Root:  {}", bank.root().display());
            println!("Index: {}", bank.index_path().display());
            println!("{}", bank.stats()?);
        }

        Commands::Config { output } => {
            let config = wavebank::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wavebank={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Parse RFC 3339 or integer nanoseconds since the epoch
fn parse_time(s: &str) -> anyhow::Result<i64> {
    let s = s.trim();
    if let Ok(ns) = s.parse::<i64>() {
        return Ok(ns);
    }
    let dt = DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid time '{}': use RFC 3339 or nanoseconds", s))?;
    let dt: DateTime<Utc> = dt.with_timezone(&Utc);
    if dt.timestamp_nanos_opt().is_none() {
        bail!("Time '{}' is outside the supported range", s);
    }
    Ok(from_datetime(&dt))
}

fn format_time(ns: i64) -> String {
    to_datetime(ns).to_rfc3339()
}

fn print_series(series: &[Series], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(series)?),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            writer.write_record(["identifier", "timestamp", "value"])?;
            for s in series {
                let id = s.identifier.to_string();
                for (ts, value) in s.iter() {
                    writer.write_record([id.clone(), ts.to_string(), value.to_string()])?;
                }
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            if series.is_empty() {
                println!("No data for the selected range");
                return Ok(());
            }
            println!(
                "{:<20} {:<36} {:<36} {:>10} {:>12}",
                "Identifier", "Start", "End", "Samples", "Interval"
            );
            println!("{}", "-".repeat(118));
            for s in series {
                println!(
                    "{:<20} {:<36} {:<36} {:>10} {:>10}ns",
                    s.identifier.to_string(),
                    format_time(s.start),
                    format_time(s.end()),
                    s.len(),
                    s.sample_interval
                );
            }
        }
    }
    Ok(())
}

fn print_entries(entries: &[IndexEntry], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entries)?),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            writer.write_record(["identifier", "start", "end", "sample_interval", "path", "format"])?;
            for e in entries {
                writer.write_record([
                    e.identifier.to_string(),
                    e.start.to_string(),
                    e.end.to_string(),
                    e.sample_interval.to_string(),
                    e.path.clone(),
                    e.format.clone(),
                ])?;
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("Index is empty; run `wavebank index` first");
                return Ok(());
            }
            println!("{:<20} {:<36} {:<36} {}", "Identifier", "Start", "End", "Path");
            println!("{}", "-".repeat(110));
            for e in entries {
                println!(
                    "{:<20} {:<36} {:<36} {}",
                    e.identifier.to_string(),
                    format_time(e.start),
                    format_time(e.end),
                    e.path
                );
            }
        }
    }
    Ok(())
}
