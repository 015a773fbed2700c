use std::sync::Arc;
use std::time::Duration;

use jiff::civil::Date;

use crate::app::App;
use crate::calculation::resolver::PatternResolver;
use crate::calculation::run_report::RunReport;
use crate::cli::{Cli, Commands};
use crate::io::destination::{self, PeriodReplacer, TableName};
use crate::io::object_source::{self, CachedSource, ObjectLayout, ObjectSource};
use crate::io::{cache, tokens};
use crate::pipeline::{Pipeline, Sink};
use crate::prelude::*;

/// Resolves the settings, then hands the run to the pipeline with the sink the command asks for.
///
/// Settings problems come back as `Err`. Anything that goes wrong once the pipeline starts
/// ends up inside the report instead.
pub fn dispatch(ctx: &mut App, today: Date) -> AppResult<RunReport> {
    let cli = &ctx.cli;

    let account_scope = cli.try_get_account_scope()?;
    let period = cli.resolve_period(today)?;
    let timeout = Duration::from_secs(cli.timeout_secs);

    let tokens_file = cli.try_get_tokens_file()?;
    let resolver = PatternResolver::new(tokens::load(&tokens_file)?)?;
    tracing::info!(
        tokens = resolver.len(),
        path = %tokens_file.display(),
        "client tokens loaded"
    );

    let source = open_source(cli, timeout)?;
    let layout = ObjectLayout {
        prefix: cli.report_prefix.to_owned(),
        report_file: cli.report_file.to_owned(),
    };

    let pipeline = Pipeline {
        source: &*source,
        layout: &layout,
        resolver: &resolver,
        account_scope: Arc::clone(&account_scope),
        period,
    };

    let report = match &cli.command {
        // cur-rollup run.
        Commands::Run(args) => {
            let table = TableName::parse(&args.table)?;
            let mut connection = destination::open(&args.database, timeout)?;

            let sink = Sink::Replace {
                connection: &mut connection,
                replacer: PeriodReplacer::new(&table, &account_scope, args.batch_size),
                export_csv: args.export_csv.as_deref(),
            };

            pipeline.run(sink, &mut ctx.progress)
        }

        // cur-rollup aggregate.
        Commands::Aggregate(args) => {
            let sink = if cli.writes_csv_to_stdout() {
                Sink::CsvWriter(Box::new(std::io::stdout().lock()))
            } else {
                Sink::CsvFile(&args.output)
            };

            pipeline.run(sink, &mut ctx.progress)
        }
    };

    Ok(report)
}

// private

fn open_source(cli: &Cli, timeout: Duration) -> AppResult<Box<dyn ObjectSource>> {
    let source = object_source::from_location(cli.try_get_source()?, timeout);

    if cli.cache_ttl_minutes == 0 {
        return Ok(source);
    }

    match cache::default_dir() {
        Some(dir) => Ok(Box::new(CachedSource::new(
            source,
            dir,
            cli.cache_ttl_minutes,
        ))),
        None => {
            tracing::warn!("no cache directory on this platform, downloading without a cache");
            Ok(source)
        }
    }
}
