use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

use crate::calculation::aggregator::{self, AggregatedRow};
use crate::calculation::enricher::AttributionSource;
use crate::calculation::period::BillingPeriod;
use crate::calculation::record::EnrichedRecord;
use crate::calculation::resolver::PatternResolver;
use crate::calculation::run_report::{EnrichStats, RunReport, Stage};
use crate::config::columns;
use crate::display::Progress;
use crate::error::Error;
use crate::io::{csv_export, decoder};
use crate::io::destination::{self, PeriodReplacer};
use crate::io::line_item::RawLineItem;
use crate::io::object_source::{ObjectLayout, ObjectSource};
use crate::prelude::*;

/// Where the aggregated rows end up.
pub enum Sink<'a> {
    /// Dry run into a CSV file. The destination is never opened.
    CsvFile(&'a Path),

    /// Dry run into any writer, stdout for instance.
    CsvWriter(Box<dyn Write + 'a>),

    /// Replace the period's rows in the destination, optionally keeping a CSV copy.
    Replace {
        connection: &'a mut Connection,
        replacer: PeriodReplacer<'a>,
        export_csv: Option<&'a Path>,
    },
}

impl Sink<'_> {
    fn plan(&self) -> Vec<Stage> {
        let mut plan = vec![Stage::Fetch, Stage::Decode, Stage::Enrich, Stage::Aggregate];

        match self {
            Sink::CsvFile(_) | Sink::CsvWriter(_) => plan.push(Stage::Export),
            Sink::Replace { export_csv, .. } => {
                if export_csv.is_some() {
                    plan.push(Stage::Export);
                }
                plan.push(Stage::Replace);
            }
        }

        plan
    }
}

/// One daily run over one billing period of one account.
pub struct Pipeline<'a> {
    pub source: &'a dyn ObjectSource,
    pub layout: &'a ObjectLayout,
    pub resolver: &'a PatternResolver,
    pub account_scope: Arc<str>,
    pub period: BillingPeriod,
}

impl Pipeline<'_> {
    /// Runs every stage in order and stops at the first failure.
    ///
    /// The failure is kept inside the report, next to the stages that did complete.
    pub fn run(&self, sink: Sink<'_>, progress: &mut Progress) -> RunReport {
        let plan = sink.plan();
        let mut report = RunReport::new(self.period, &plan);
        progress.plan(plan.len());

        tracing::info!(
            period = %self.period,
            account_scope = %self.account_scope,
            source = self.source.location(),
            "run started"
        );

        if let Err(error) = self.execute(sink, &mut report, progress) {
            report.fail(error);
        }

        tracing::info!(period = %self.period, succeeded = report.succeeded(), "run finished");

        report
    }

    // private

    fn execute(
        &self,
        sink: Sink<'_>,
        report: &mut RunReport,
        progress: &mut Progress,
    ) -> AppResult<()> {
        let key = self.layout.key(self.period);

        progress.begin(Stage::Fetch, &key);
        let bytes = self.source.fetch(&key)?;
        report.complete(
            Stage::Fetch,
            format!("{} bytes from {}/{key}", bytes.len(), self.source.location()),
        );

        progress.begin(Stage::Decode, "");
        let export = decoder::decode(&bytes)?;
        drop(bytes);
        report.complete(
            Stage::Decode,
            format!("{} line items, {} columns", export.items.len(), export.header.len()),
        );

        // All or nothing: a partial aggregation is never produced.
        let missing = export.header.missing(columns::required_inputs());
        if !missing.is_empty() {
            return Err(Error::SchemaMismatch { missing }.into());
        }

        // Zero line items is a broken export far more often than an empty month.
        if export.items.is_empty() {
            return Err(Error::EmptyExport { key }.into());
        }

        progress.begin(Stage::Enrich, "");
        let (records, stats) = self.enrich(export.items);
        report.complete(Stage::Enrich, describe(&stats));
        report.enrichment = Some(stats);

        progress.begin(Stage::Aggregate, "");
        let rows = aggregator::aggregate(&export.header, &records)?;
        report.fingerprint = Some(format!("{:016x}", aggregator::fingerprint(&rows)));
        report.complete(
            Stage::Aggregate,
            format!("{} rows from {} line items", rows.len(), records.len()),
        );
        drop(records);

        match sink {
            Sink::CsvFile(path) => {
                progress.begin(Stage::Export, &path.display().to_string());
                csv_export::write_rows(path, &rows)?;
                report.complete(
                    Stage::Export,
                    format!("{} rows to {}", rows.len(), path.display()),
                );
            }

            Sink::CsvWriter(writer) => {
                progress.begin(Stage::Export, "");
                csv_export::write_to(writer, &rows)?;
                report.complete(Stage::Export, format!("{} rows", rows.len()));
            }

            Sink::Replace {
                connection,
                replacer,
                export_csv,
            } => {
                if let Some(path) = export_csv {
                    progress.begin(Stage::Export, &path.display().to_string());
                    csv_export::write_rows(path, &rows)?;
                    report.complete(
                        Stage::Export,
                        format!("{} rows to {}", rows.len(), path.display()),
                    );
                }

                progress.begin(Stage::Replace, &replacer.table().to_string());
                self.replace(connection, &replacer, &rows, report)?;
            }
        }

        Ok(())
    }

    fn enrich(&self, items: Vec<RawLineItem>) -> (Vec<EnrichedRecord>, EnrichStats) {
        let mut stats = EnrichStats {
            line_items: items.len(),
            ..EnrichStats::default()
        };

        let records: Vec<EnrichedRecord> = items
            .into_iter()
            .map(|item| {
                let (record, source) =
                    EnrichedRecord::build(item, self.resolver, &self.account_scope);

                *stats.attribution.entry(source).or_default() += 1;

                match &record.dates.event_date {
                    None => stats.unknown_event_dates += 1,
                    Some(date) if !self.period.contains(date) => {
                        stats.out_of_period_event_dates += 1
                    }
                    Some(_) => {}
                }

                record
            })
            .collect();

        let malformed = stats.count(AttributionSource::Malformed);
        if malformed > 0 {
            tracing::warn!(malformed, "line items with unreadable resource tags");
        }
        if stats.unknown_event_dates > 0 {
            tracing::warn!(
                line_items = stats.unknown_event_dates,
                "line items without a usable identity_time_interval"
            );
        }
        if stats.out_of_period_event_dates > 0 {
            tracing::warn!(
                line_items = stats.out_of_period_event_dates,
                period = %self.period,
                "line items dated outside the billing period"
            );
        }

        (records, stats)
    }

    fn replace(
        &self,
        connection: &mut Connection,
        replacer: &PeriodReplacer<'_>,
        rows: &[AggregatedRow],
        report: &mut RunReport,
    ) -> AppResult<()> {
        destination::ensure_table(connection, replacer.table())?;

        let summary = replacer.replace(connection, self.period, rows)?;

        report.complete(
            Stage::Replace,
            format!(
                "{} rows deleted, {} inserted in {} batches into {}",
                summary.deleted,
                summary.inserted,
                summary.batches,
                replacer.table()
            ),
        );

        Ok(())
    }
}

fn describe(stats: &EnrichStats) -> String {
    format!(
        "{} line items: {} tagged, {} by resource id, {} unresolved, {} malformed tags",
        stats.line_items,
        stats.count(AttributionSource::Tagged),
        stats.count(AttributionSource::Pattern),
        stats.count(AttributionSource::Unresolved),
        stats.count(AttributionSource::Malformed),
    )
}
