//! CLI argument definitions for ferroquant.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tools` | List the available tools |
//! | `schema` | Show the input and output schema of one tool |
//! | `call` | Run a tool with a JSON input |
//! | `cache` | Inspect and maintain the local cache |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Treat warnings as errors |
//! | `--deadline-ms` | `FERROQUANT_DEADLINE_MS` or 30000 | Overall deadline of the call |
//! | `--timeout-ms` | `FERROQUANT_TIMEOUT_MS` or 10000 | Timeout of one provider request |
//! | `--db-path` | `FERROQUANT_DB_PATH` or `$FERROQUANT_HOME/cache/analytics.duckdb` | Cache database |
//! | `--no-cache` | `false` | Use a throwaway in-memory cache |
//!
//! # Examples
//!
//! ```bash
//! ferroquant call discount_factor \
//!   '{"curve":{"pillars":[{"date":"2024-01-01","rate":0.03}]},"dates":["2025-01-01"]}'
//!
//! ferroquant call price_instrument --input-file swap.json --pretty
//!
//! ferroquant cache invalidate --kind curve
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Fixed-income analytics over normalized market data.
#[derive(Debug, Parser)]
#[command(
    name = "ferroquant",
    author,
    version,
    about = "Fixed-income analytics over normalized market data",
    long_about = "ferroquant fetches rate series from Yahoo, Polygon and Alpha Vantage, builds \
discount curves and prices instruments against them. Every command prints a JSON envelope \
with data, provenance metadata and structured errors.\n\
\n\
Use 'ferroquant <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Treat warnings and errors as failures (exit code 5).
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    /// Overall deadline of one tool call in milliseconds.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub deadline_ms: Option<u64>,

    /// Timeout of a single provider request in milliseconds.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_ms: Option<u64>,

    /// Cache database file.
    #[arg(long, global = true, conflicts_with = "no_cache")]
    pub db_path: Option<PathBuf>,

    /// Use an in-memory cache that is dropped on exit.
    #[arg(long, global = true, default_value_t = false)]
    pub no_cache: bool,

    /// Log service activity to stderr.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Single JSON object output.
    Json,
    /// Human-readable summary followed by the data.
    Table,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the available tools with their descriptions.
    Tools,

    /// Show the input and output JSON schema of a tool.
    ///
    /// # Examples
    ///
    ///   ferroquant schema price_instrument --pretty
    Schema(SchemaArgs),

    /// Run a tool.
    ///
    /// The input is a JSON object given inline, read from a file, or read
    /// from stdin when omitted or '-'.
    ///
    /// # Examples
    ///
    ///   ferroquant call get_series '{"requests":[{"provider":"yahoo","symbol":"^TNX"}]}'
    ///   cat curve.json | ferroquant call get_discount_curve
    Call(CallArgs),

    /// Cache maintenance commands.
    Cache(CacheArgs),
}

/// Arguments for the `schema` command.
#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Tool name (e.g. 'discount_factor').
    pub tool: String,
}

/// Arguments for the `call` command.
#[derive(Debug, Args)]
pub struct CallArgs {
    /// Tool name.
    pub tool: String,

    /// JSON input; '-' or omitted reads stdin.
    #[arg(conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Read the JSON input from a file.
    #[arg(long)]
    pub input_file: Option<PathBuf>,
}

/// Arguments for the `cache` command group.
#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

/// Cache management subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show entry counts and hit statistics.
    Stats,

    /// Drop entries by key, key prefix or kind.
    Invalidate(InvalidateArgs),

    /// Delete every entry past its TTL.
    Purge,
}

/// Arguments for `cache invalidate`.
#[derive(Debug, Args)]
#[command(group(clap::ArgGroup::new("target").required(true).multiple(true)))]
pub struct InvalidateArgs {
    /// Exact cache key.
    #[arg(long, group = "target")]
    pub key: Option<String>,

    /// Key prefix, e.g. 'series:'.
    #[arg(long, group = "target")]
    pub prefix: Option<String>,

    /// Every entry of one kind.
    #[arg(long, value_enum, group = "target")]
    pub kind: Option<CacheKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheKind {
    Series,
    Curve,
    Valuation,
}

impl CacheKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Series => "series",
            Self::Curve => "curve",
            Self::Valuation => "valuation",
        }
    }
}
