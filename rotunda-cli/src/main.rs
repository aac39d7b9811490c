//! CLI for the rotunda round-robin time-series database.
//!
//! Mirrors the classic command surface: create, update, fetch, first,
//! last, and info, all operating on one database file.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rotunda::Database;

/// rotunda — Embedded round-robin time-series database CLI.
#[derive(Parser)]
#[command(name = "rotunda", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create a database file from DS: and RRA: definitions.
    Create {
        /// Path of the database file to create.
        path: PathBuf,

        /// Definition tokens: DS:..., RRA:..., -b <start>, -s <step>.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Apply one or more <timestamp>:<value>[:<value>...] update lines.
    Update {
        /// Path of the database file.
        path: PathBuf,

        /// Update tokens: optional -t <name:name:...>, then update lines.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Fetch consolidated rows for a time range.
    Fetch {
        /// Path of the database file.
        path: PathBuf,

        /// Consolidation function (AVERAGE, MIN, MAX, LAST).
        cf: String,

        /// Range start in epoch seconds (defaults to end - 1 day).
        #[arg(long)]
        start: Option<i64>,

        /// Range end in epoch seconds (defaults to now).
        #[arg(long)]
        end: Option<i64>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Print the oldest timestamp an archive still addresses.
    First {
        /// Path of the database file.
        path: PathBuf,

        /// Archive index to inspect.
        #[arg(long, default_value = "0")]
        archive: usize,
    },

    /// Print the timestamp of the most recent update.
    Last {
        /// Path of the database file.
        path: PathBuf,
    },

    /// Dump header fields, data sources, archives, and accumulators.
    Info {
        /// Path of the database file.
        path: PathBuf,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for fetch and info results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// One `key = value` line per entry.
    Text,
    /// JSON object or array.
    Json,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Create { path, args } => cmd_create(&path, &args),
        Commands::Update { path, args } => cmd_update(&path, &args),
        Commands::Fetch {
            path,
            cf,
            start,
            end,
            format,
        } => cmd_fetch(&path, &cf, start, end, &format),
        Commands::First { path, archive } => cmd_first(&path, archive),
        Commands::Last { path } => cmd_last(&path),
        Commands::Info { path, format } => cmd_info(&path, &format),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `rotunda create <path> <tokens...>`.
fn cmd_create(path: &PathBuf, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let tokens: Vec<&str> = args.iter().map(String::as_str).collect();
    rotunda::create(path, &tokens)?;
    Ok(())
}

/// Implements `rotunda update <path> <tokens...>`.
fn cmd_update(path: &PathBuf, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let tokens: Vec<&str> = args.iter().map(String::as_str).collect();
    rotunda::update(path, &tokens)?;
    Ok(())
}

/// Implements `rotunda fetch <path> <cf>`.
fn cmd_fetch(
    path: &PathBuf,
    cf: &str,
    start: Option<i64>,
    end: Option<i64>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(path)?;
    let cf = cf.parse()?;
    let end = end.unwrap_or_else(|| db.last());
    let start = start.unwrap_or(end - 86_400);

    let (range, names, rows) = db.fetch(cf, start, end)?;

    match format {
        OutputFormat::Csv | OutputFormat::Text => {
            println!("time,{}", names.join(","));
            for (i, row) in rows.iter().enumerate() {
                let time = range.start + range.step as i64 * (i as i64 + 1);
                let cells: Vec<String> = row
                    .iter()
                    .map(|v| v.map_or_else(|| "U".to_string(), |v| v.to_string()))
                    .collect();
                println!("{time},{}", cells.join(","));
            }
        }
        OutputFormat::Json => {
            let objects: Vec<serde_json::Value> = rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    let time = range.start + range.step as i64 * (i as i64 + 1);
                    let mut object = serde_json::Map::new();
                    object.insert("time".to_string(), time.into());
                    for (name, value) in names.iter().zip(row) {
                        object.insert(name.clone(), (*value).into());
                    }
                    serde_json::Value::Object(object)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&objects)?);
        }
    }

    Ok(())
}

/// Implements `rotunda first <path>`.
fn cmd_first(path: &PathBuf, archive: usize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", Database::open(path)?.first(archive)?);
    Ok(())
}

/// Implements `rotunda last <path>`.
fn cmd_last(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", Database::open(path)?.last());
    Ok(())
}

/// Implements `rotunda info <path>`.
fn cmd_info(path: &PathBuf, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let dump = rotunda::info(path)?;

    match format {
        OutputFormat::Text | OutputFormat::Csv => {
            for (key, value) in dump.iter() {
                println!("{key} = {}", serde_json::to_string(value)?);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
    }

    Ok(())
}
