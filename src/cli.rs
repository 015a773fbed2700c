use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use jiff::civil::Date;

use crate::calculation::period::BillingPeriod;
use crate::error::Error;
use crate::io::destination::DEFAULT_BATCH_SIZE;
use crate::io::object_source::{DEFAULT_PREFIX, DEFAULT_REPORT_FILE};
use crate::io::tokens;
use crate::prelude::*;

pub const DEFAULT_TABLE: &str = "aws_billing_daily";
pub const DEFAULT_OUTPUT: &str = "aggregated_cur_report.csv";

/// `--output` value that sends the CSV to stdout.
pub const STDOUT: &str = "-";

impl Cli {
    /// Convenience constructor to avoid redundant `Parser` imports in main.
    pub fn new() -> Self {
        Cli::parse()
    }

    /// The scope bounds what a run may delete. Blank names and wildcard characters are refused.
    pub fn try_get_account_scope(&self) -> AppResult<Arc<str>> {
        let scope = self
            .account_scope
            .as_deref()
            .map(str::trim)
            .ok_or(Error::AccountScopeNotFound)?;

        if scope.is_empty() || scope.contains(['%', '*']) {
            return Err(Error::InvalidAccountScope(scope.to_owned()).into());
        }

        Ok(Arc::from(scope))
    }

    pub fn try_get_source(&self) -> AppResult<&str> {
        let source = self
            .source
            .as_deref()
            .map(str::trim)
            .filter(|source| !source.is_empty())
            .ok_or(Error::SourceNotFound)?;

        Ok(source)
    }

    pub fn try_get_tokens_file(&self) -> AppResult<PathBuf> {
        match &self.tokens_file {
            Some(path) => Ok(path.to_owned()),
            None => tokens::default_path().ok_or_else(|| {
                miette::miette!(
                    help = "Pass --tokens-file or set CUR_CLIENT_TOKENS.",
                    "Could not find a config directory for the client token list."
                )
            }),
        }
    }

    /// The explicit `--period`, or the month of the day before `today`.
    pub fn resolve_period(&self, today: Date) -> AppResult<BillingPeriod> {
        match self.period {
            Some(period) => Ok(period),
            None => BillingPeriod::preceding_day_of(today),
        }
    }

    /// When the CSV goes to stdout, stdout belongs to it alone.
    pub fn writes_csv_to_stdout(&self) -> bool {
        matches!(&self.command, Commands::Aggregate(args) if args.output.as_os_str() == STDOUT)
    }
}

// Structs

/// Daily rollup of a cost and usage report export into a reporting table.
///
/// Runs for the same period must not overlap. Schedule them one at a time.
#[derive(Parser, Debug)]
#[command(name = "cur-rollup", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    //
    // Global args start here..
    //

    //
    /// Billing period to process, as YYYY-MM. Defaults to the month of yesterday.
    #[arg(long, env = "BILLING_PERIOD", global = true)]
    pub period: Option<BillingPeriod>,

    /// Where exports live: an http(s) base url or a local directory.
    #[arg(long, env = "CUR_SOURCE", global = true)]
    pub source: Option<String>,

    #[arg(long, default_value = DEFAULT_PREFIX, global = true)]
    pub report_prefix: String,

    #[arg(long, default_value = DEFAULT_REPORT_FILE, global = true)]
    pub report_file: String,

    /// Newline-delimited list of client tokens to look for in resource ids.
    #[arg(long, env = "CUR_CLIENT_TOKENS", global = true)]
    pub tokens_file: Option<PathBuf>,

    /// Account name written on every row, and the only rows a run may delete.
    #[arg(long, env = "CUR_ACCOUNT_SCOPE", global = true)]
    pub account_scope: Option<String>,

    /// Upper bound for the download and for waiting on database locks.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..), global = true)]
    pub timeout_secs: u64,

    /// Keep downloaded exports on disk for this long. 0 turns the cache off.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(i64).range(0..), global = true)]
    pub cache_ttl_minutes: i64,

    /// Log filter, in `tracing` env-filter syntax. Logs go to stderr.
    #[arg(long, env = "CUR_ROLLUP_LOG", default_value = "info", global = true)]
    pub log_level: String,

    /// Skip animations
    #[arg(long, default_value_t = false, global = true)]
    pub no_animate: bool,

    /// Print the run report as one line of JSON.
    #[arg(long, default_value_t = false, global = true)]
    pub unformatted: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, enrich and aggregate the export, then replace the period in the destination table.
    Run(RunArgs),

    /// Fetch, enrich and aggregate the export, then write CSV. The destination is not touched.
    Aggregate(AggregateArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// SQLite database holding the destination table.
    #[arg(long, env = "CUR_DATABASE")]
    pub database: PathBuf,

    #[arg(long, default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Rows per insert statement.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub batch_size: usize,

    /// Also write the aggregated rows to this CSV file.
    #[arg(long)]
    pub export_csv: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct AggregateArgs {
    /// CSV file to write, or '-' for stdout.
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,
}
