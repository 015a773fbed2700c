use std::fmt;
use std::path::Path;
use std::time::Duration;

use itertools::Itertools;
use rusqlite::types::Value;
use rusqlite::{Connection, Transaction, params, params_from_iter};

use crate::calculation::aggregator::AggregatedRow;
use crate::calculation::period::BillingPeriod;
use crate::config::columns::{DIMENSIONS, DimensionSource, MEASURES, PERIOD_MONTH};
use crate::error::Error;
use crate::prelude::*;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// A destination table name. It ends up inside SQL text, so only plain identifiers pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut chars = raw.chars();
        let starts_well = chars
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
        let rest_is_plain = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !(starts_well && rest_is_plain) {
            return Err(Error::InvalidTableName(raw.to_owned()));
        }

        Ok(TableName(raw.to_owned()))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opens the destination database. Lock waits are bounded by `busy_timeout`.
pub fn open(path: &Path, busy_timeout: Duration) -> AppResult<Connection> {
    let connect_error = |source| Error::Connect {
        path: path.display().to_string(),
        source,
    };

    let connection = Connection::open(path).map_err(connect_error)?;
    connection.busy_timeout(busy_timeout).map_err(connect_error)?;

    Ok(connection)
}

/// Creates the destination table and its scope index when they don't exist yet.
pub fn ensure_table(connection: &Connection, table: &TableName) -> AppResult<()> {
    let columns = DIMENSIONS
        .iter()
        .map(|dimension| format!("{} TEXT NOT NULL", dimension.name))
        .chain(std::iter::once(format!("{PERIOD_MONTH} TEXT NOT NULL")))
        .chain(MEASURES.iter().map(|measure| format!("{} REAL NOT NULL", measure.name)))
        .join(",\n    ");

    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {columns}\n);\n\
         CREATE INDEX IF NOT EXISTS {table}_period_scope ON {table} (account_name, {PERIOD_MONTH});"
    );

    connection
        .execute_batch(&ddl)
        .map_err(|source| Error::Destination {
            table: table.to_string(),
            source,
        })?;

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplacePhase {
    Delete,
    Insert,
}

/// Where a replace stands.
///
/// `Idle -> Deleting -> Inserting -> Committed`, and `Deleting`/`Inserting` can fall into
/// `Failed`. Nothing leaves `Failed` except the rollback.
#[derive(Debug)]
pub enum ReplaceState {
    Idle,
    Deleting,
    Inserting { deleted: usize },
    Committed { deleted: usize, inserted: usize },
    Failed { phase: ReplacePhase, error: Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplaceSummary {
    pub deleted: usize,
    pub inserted: usize,
    pub batches: usize,
}

/// Swaps one account's rows for one billing period.
///
/// The delete and the batched insert each run in their own savepoint, and both sit inside a
/// single transaction that only commits once the insert phase is done. Whatever fails, the
/// period is left exactly as it was before the call.
///
/// Two replaces of the same period must not run at the same time. That's on the caller.
#[derive(Debug)]
pub struct PeriodReplacer<'a> {
    table: &'a TableName,
    account_scope: &'a str,
    batch_size: usize,
}

impl<'a> PeriodReplacer<'a> {
    pub fn new(table: &'a TableName, account_scope: &'a str, batch_size: usize) -> Self {
        PeriodReplacer {
            table,
            account_scope,
            batch_size: batch_size.max(1),
        }
    }

    pub fn table(&self) -> &TableName {
        self.table
    }

    pub fn replace(
        &self,
        connection: &mut Connection,
        period: BillingPeriod,
        rows: &[AggregatedRow],
    ) -> AppResult<ReplaceSummary> {
        if rows.is_empty() {
            return Err(Error::EmptyReplacement {
                period: period.to_string(),
            }
            .into());
        }

        let mut transaction = connection
            .transaction()
            .map_err(|source| Error::DeletePhase {
                period: period.to_string(),
                source,
            })?;

        let mut state = ReplaceState::Idle;
        let mut batches = 0;

        loop {
            tracing::debug!(table = %self.table, %period, ?state, "period replace");

            state = match state {
                ReplaceState::Idle => ReplaceState::Deleting,

                ReplaceState::Deleting => match self.delete(&mut transaction, period) {
                    Ok(deleted) => ReplaceState::Inserting { deleted },
                    Err(error) => ReplaceState::Failed {
                        phase: ReplacePhase::Delete,
                        error,
                    },
                },

                ReplaceState::Inserting { deleted } => {
                    match self.insert(&mut transaction, period, rows) {
                        Ok((inserted, used_batches)) => {
                            batches = used_batches;
                            ReplaceState::Committed { deleted, inserted }
                        }
                        Err(error) => ReplaceState::Failed {
                            phase: ReplacePhase::Insert,
                            error,
                        },
                    }
                }

                ReplaceState::Committed { deleted, inserted } => {
                    transaction.commit().map_err(|source| Error::Commit {
                        period: period.to_string(),
                        source,
                    })?;

                    tracing::info!(
                        table = %self.table,
                        %period,
                        deleted,
                        inserted,
                        batches,
                        "period replaced"
                    );

                    return Ok(ReplaceSummary {
                        deleted,
                        inserted,
                        batches,
                    });
                }

                ReplaceState::Failed { phase, error } => {
                    if let Err(rollback_error) = transaction.rollback() {
                        // The connection drops the transaction anyway once it goes away.
                        tracing::warn!(%rollback_error, "explicit rollback failed");
                    }

                    tracing::error!(table = %self.table, %period, ?phase, "period replace failed");

                    return Err(error.into());
                }
            };
        }
    }

    // private

    fn delete(&self, transaction: &mut Transaction, period: BillingPeriod) -> Result<usize, Error> {
        let delete_error = |source| Error::DeletePhase {
            period: period.to_string(),
            source,
        };

        let savepoint = transaction.savepoint().map_err(delete_error)?;

        let deleted = savepoint
            .execute(
                &format!(
                    "DELETE FROM {} WHERE account_name = ?1 AND {PERIOD_MONTH} = ?2",
                    self.table
                ),
                params![self.account_scope, period.to_string()],
            )
            .map_err(delete_error)?;

        savepoint.commit().map_err(delete_error)?;

        Ok(deleted)
    }

    /// Returns the number of inserted rows and batches.
    fn insert(
        &self,
        transaction: &mut Transaction,
        period: BillingPeriod,
        rows: &[AggregatedRow],
    ) -> Result<(usize, usize), Error> {
        let insert_error = |first, last| {
            move |source| Error::InsertPhase {
                period: period.to_string(),
                first,
                last,
                source,
            }
        };

        let savepoint = transaction.savepoint().map_err(insert_error(0, rows.len()))?;
        let mut batches = 0;

        {
            let mut statement = savepoint
                .prepare(&insert_sql(self.table))
                .map_err(insert_error(0, rows.len()))?;

            for (index, batch) in rows.chunks(self.batch_size).enumerate() {
                let first = index * self.batch_size;
                let last = first + batch.len();

                for row in batch {
                    statement
                        .execute(params_from_iter(row_values(row, period, self.account_scope)))
                        .map_err(insert_error(first, last))?;
                }

                batches += 1;
                tracing::debug!(batch = batches, first, last, "inserted batch");
            }
        }

        savepoint.commit().map_err(insert_error(0, rows.len()))?;

        Ok((rows.len(), batches))
    }
}

// private

fn insert_sql(table: &TableName) -> String {
    let names: Vec<&str> = DIMENSIONS
        .iter()
        .map(|dimension| dimension.name)
        .chain(std::iter::once(PERIOD_MONTH))
        .chain(MEASURES.iter().map(|measure| measure.name))
        .collect();

    let placeholders = (1..=names.len()).map(|n| format!("?{n}")).join(", ");

    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        names.join(", ")
    )
}

/// Values in `insert_sql` column order.
///
/// `period_month` is the run's period for every row. Rows whose event date lies in the period
/// would derive the same month anyway, and rows with an unknown event date have nothing else
/// to go on. `account_name` is always the replacer's scope. Together they make the next
/// delete see every row this one inserts.
fn row_values(row: &AggregatedRow, period: BillingPeriod, account_scope: &str) -> Vec<Value> {
    DIMENSIONS
        .iter()
        .zip(row.key.values())
        .map(|(dimension, value)| match dimension.source {
            DimensionSource::AccountName => Value::Text(account_scope.to_owned()),
            _ => Value::Text(value.clone()),
        })
        .chain(std::iter::once(Value::Text(period.to_string())))
        .chain(row.value.values().iter().map(|value| Value::Real(*value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::calculation::aggregator::aggregate;
    use crate::calculation::record::EnrichedRecord;
    use crate::calculation::resolver::PatternResolver;
    use crate::config::columns;
    use crate::io::line_item::{Header, RawLineItem};

    const SCOPE: &str = "acct";

    fn period() -> BillingPeriod {
        "2024-05".parse().unwrap()
    }

    fn table() -> TableName {
        TableName::parse("aws_billing_daily").unwrap()
    }

    fn setup() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        ensure_table(&connection, &table()).unwrap();
        connection
    }

    /// `count` rows, each in its own group, tagged with `operation`.
    fn rows(count: usize, operation: &str, scope: &str) -> Vec<AggregatedRow> {
        let header = Arc::new(Header::new(columns::required_inputs()));
        let resolver = PatternResolver::new(Vec::<String>::new()).unwrap();
        let scope: Arc<str> = Arc::from(scope);

        let records: Vec<_> = (0..count)
            .map(|n| {
                let id = format!("acct-{n:05}");
                let item = RawLineItem::from_pairs(
                    Arc::clone(&header),
                    &[
                        ("line_item_usage_account_id", id.as_str()),
                        ("line_item_operation", operation),
                        ("line_item_unblended_cost", "1.5"),
                    ],
                );
                EnrichedRecord::build(item, &resolver, &scope).0
            })
            .collect();

        aggregate(&header, &records).unwrap()
    }

    fn count(connection: &Connection, scope: &str) -> usize {
        connection
            .query_row(
                "SELECT COUNT(*) FROM aws_billing_daily WHERE account_name = ?1 AND period_month = ?2",
                params![scope, period().to_string()],
                |row| row.get::<_, i64>(0),
            )
            .unwrap() as usize
    }

    fn operations(connection: &Connection) -> Vec<String> {
        let mut statement = connection
            .prepare("SELECT DISTINCT line_item_operation FROM aws_billing_daily ORDER BY 1")
            .unwrap();

        statement
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn fail_inserts_of(connection: &Connection, operation: &str) {
        connection
            .execute_batch(&format!(
                "CREATE TRIGGER fail_insert BEFORE INSERT ON aws_billing_daily \
                 WHEN NEW.line_item_operation = '{operation}' \
                 BEGIN SELECT RAISE(ABORT, 'injected insert failure'); END;"
            ))
            .unwrap();
    }

    #[test]
    fn table_names_must_be_plain_identifiers() {
        assert!(TableName::parse("aws_billing_daily").is_ok());
        assert!(TableName::parse("_t2").is_ok());

        for raw in ["", "2fast", "billing daily", "t;DROP TABLE x", "a-b", "\"quoted\""] {
            assert!(TableName::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn inserts_in_batches() {
        let mut connection = setup();
        let rows = rows(25, "RunInstances", SCOPE);

        let summary = PeriodReplacer::new(&table(), SCOPE, 10)
            .replace(&mut connection, period(), &rows)
            .unwrap();

        assert_eq!(
            summary,
            ReplaceSummary {
                deleted: 0,
                inserted: 25,
                batches: 3
            }
        );
        assert_eq!(count(&connection, SCOPE), 25);
    }

    #[test]
    fn rerunning_replaces_instead_of_duplicating() {
        let mut connection = setup();
        let rows = rows(7, "RunInstances", SCOPE);
        let table = table();
        let replacer = PeriodReplacer::new(&table, SCOPE, 3);

        replacer.replace(&mut connection, period(), &rows).unwrap();
        let second = replacer.replace(&mut connection, period(), &rows).unwrap();

        assert_eq!(second.deleted, 7);
        assert_eq!(second.inserted, 7);
        assert_eq!(count(&connection, SCOPE), 7);
    }

    #[test]
    fn other_accounts_and_periods_are_left_alone() {
        let mut connection = setup();

        PeriodReplacer::new(&table(), "other", 10)
            .replace(&mut connection, period(), &rows(4, "Other", "other"))
            .unwrap();
        PeriodReplacer::new(&table(), SCOPE, 10)
            .replace(&mut connection, "2024-04".parse().unwrap(), &rows(2, "April", SCOPE))
            .unwrap();

        let summary = PeriodReplacer::new(&table(), SCOPE, 10)
            .replace(&mut connection, period(), &rows(3, "May", SCOPE))
            .unwrap();

        assert_eq!(summary.deleted, 0);
        assert_eq!(count(&connection, "other"), 4);
        assert_eq!(count(&connection, SCOPE), 3);

        let total: i64 = connection
            .query_row("SELECT COUNT(*) FROM aws_billing_daily", [], |row| row.get(0))
            .unwrap();
        assert_eq!(total, 9);
    }

    #[test]
    fn a_failing_batch_rolls_back_every_batch_of_the_run() {
        let batch_size = 4;
        let total = 12;

        // Poison the first row, the last row of a batch, the first row of a later batch, and
        // the last row overall.
        for poisoned in [0, batch_size - 1, batch_size, 2 * batch_size + 1, total - 1] {
            let mut connection = setup();
            fail_inserts_of(&connection, "boom");

            let mut rows = rows(total, "RunInstances", SCOPE);
            rows[poisoned] = self::rows(1, "boom", SCOPE).remove(0);

            let error = PeriodReplacer::new(&table(), SCOPE, batch_size)
                .replace(&mut connection, period(), &rows)
                .unwrap_err();

            match error.downcast_ref::<Error>() {
                Some(Error::InsertPhase { first, last, .. }) => {
                    let batch_start = poisoned / batch_size * batch_size;
                    assert_eq!(*first, batch_start);
                    assert_eq!(*last, batch_start + batch_size);
                }
                other => panic!("unexpected error {other:?}"),
            }

            assert_eq!(count(&connection, SCOPE), 0, "poisoned row {poisoned}");
        }
    }

    #[test]
    fn a_failed_insert_keeps_the_previous_rows() {
        let mut connection = setup();
        let table = table();
        let replacer = PeriodReplacer::new(&table, SCOPE, 2);

        replacer
            .replace(&mut connection, period(), &rows(3, "Before", SCOPE))
            .unwrap();

        fail_inserts_of(&connection, "boom");
        let mut next = rows(5, "After", SCOPE);
        next[4] = rows(1, "boom", SCOPE).remove(0);

        assert!(replacer.replace(&mut connection, period(), &next).is_err());

        assert_eq!(count(&connection, SCOPE), 3);
        assert_eq!(operations(&connection), vec!["Before"]);
    }

    #[test]
    fn a_failed_delete_never_inserts() {
        let mut connection = setup();
        let table = table();
        let replacer = PeriodReplacer::new(&table, SCOPE, 10);

        replacer
            .replace(&mut connection, period(), &rows(2, "Before", SCOPE))
            .unwrap();

        connection
            .execute_batch(
                "CREATE TRIGGER fail_delete BEFORE DELETE ON aws_billing_daily \
                 BEGIN SELECT RAISE(ABORT, 'injected delete failure'); END;",
            )
            .unwrap();

        let error = replacer
            .replace(&mut connection, period(), &rows(6, "After", SCOPE))
            .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::DeletePhase { .. })
        ));
        assert_eq!(count(&connection, SCOPE), 2);
        assert_eq!(operations(&connection), vec!["Before"]);
    }

    #[test]
    fn empty_row_sets_leave_the_period_alone() {
        let mut connection = setup();
        let table = table();
        let replacer = PeriodReplacer::new(&table, SCOPE, 10);

        replacer
            .replace(&mut connection, period(), &rows(2, "Before", SCOPE))
            .unwrap();
        let error = replacer.replace(&mut connection, period(), &[]).unwrap_err();

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::EmptyReplacement { .. })
        ));
        assert_eq!(count(&connection, SCOPE), 2);
        assert_eq!(operations(&connection), vec!["Before"]);
    }

    #[test]
    fn rows_are_stored_under_the_replacer_scope() {
        let mut connection = setup();
        let table = table();
        let replacer = PeriodReplacer::new(&table, SCOPE, 2);
        let foreign = rows(3, "RunInstances", "other");

        replacer.replace(&mut connection, period(), &foreign).unwrap();
        let second = replacer.replace(&mut connection, period(), &foreign).unwrap();

        assert_eq!(second.deleted, 3);
        assert_eq!(count(&connection, SCOPE), 3);
        assert_eq!(count(&connection, "other"), 0);
    }
}
