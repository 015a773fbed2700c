use miette::Diagnostic;
use thiserror::Error;

// Codes follow the same layout everywhere:
// cur_rollup::parse -> cli argument parsing/validation.
// cur_rollup::config -> environment, credentials, settings.
// cur_rollup::source -> fetching and decoding the export.
// cur_rollup::schema -> the export doesn't look like a CUR.
// cur_rollup::replace -> destination writes.

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Invalid billing period '{0}', expected YYYY-MM.")]
    #[diagnostic(
        code(cur_rollup::parse::period),
        help("Use a year and a month, for example '2024-05'.")
    )]
    InvalidPeriod(String),

    #[error("Account scope not found.")]
    #[diagnostic(
        code(cur_rollup::config::account_scope),
        help(
            "Pass --account-scope or set CUR_ACCOUNT_SCOPE.\n\
The scope limits which destination rows a run may delete, so it has to be explicit."
        )
    )]
    AccountScopeNotFound,

    #[error("Account scope '{0}' is not allowed.")]
    #[diagnostic(
        code(cur_rollup::config::account_scope),
        help("The scope must be a non-blank literal name without '%' or '*'.")
    )]
    InvalidAccountScope(String),

    #[error("Invalid table name '{0}'.")]
    #[diagnostic(
        code(cur_rollup::config::table),
        help("Only ASCII letters, digits and '_' are allowed, and it can't start with a digit.")
    )]
    InvalidTableName(String),

    #[error("Source location not found.")]
    #[diagnostic(
        code(cur_rollup::config::source),
        help("Pass --source or set CUR_SOURCE to an http(s) base url or a local directory.")
    )]
    SourceNotFound,

    #[error("Could not fetch '{key}' from {location}.")]
    #[diagnostic(
        code(cur_rollup::source::fetch),
        help("Nothing was written to the destination, so it is safe to run again.")
    )]
    Fetch {
        location: String,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Could not decode the export: {0}")]
    #[diagnostic(code(cur_rollup::source::decode))]
    Decode(#[source] csv::Error),

    #[error("Could not read the client token list at {path}.")]
    #[diagnostic(
        code(cur_rollup::config::tokens),
        help("Pass --tokens-file or set CUR_CLIENT_TOKENS to a newline-delimited file.")
    )]
    TokenList {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("The export is missing required columns: {}", .missing.join(", "))]
    #[diagnostic(
        code(cur_rollup::schema::missing_columns),
        help("Check that the report was generated with resource ids and tags included.")
    )]
    SchemaMismatch { missing: Vec<String> },

    #[error("The export at '{key}' has a header but no line items.")]
    #[diagnostic(
        code(cur_rollup::schema::empty),
        help(
            "An empty export usually means a partial upload. The destination was not touched,\n\
so the rows already stored for this period are still there."
        )
    )]
    EmptyExport { key: String },

    #[error("Refusing to replace {period} with an empty row set.")]
    #[diagnostic(
        code(cur_rollup::replace::empty),
        help("Nothing was deleted. Replacing a period needs at least one aggregated row.")
    )]
    EmptyReplacement { period: String },

    #[error("Could not open the destination database at {path}.")]
    #[diagnostic(
        code(cur_rollup::replace::connect),
        help("Nothing was written to the destination, so it is safe to run again.")
    )]
    Connect {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Could not prepare destination table '{table}'.")]
    #[diagnostic(code(cur_rollup::replace::schema))]
    Destination {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Deleting rows for {period} failed; the period was left untouched.")]
    #[diagnostic(code(cur_rollup::replace::delete))]
    DeletePhase {
        period: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error(
        "Inserting rows {first}..{last} for {period} failed; the period was left untouched."
    )]
    #[diagnostic(code(cur_rollup::replace::insert))]
    InsertPhase {
        period: String,
        first: usize,
        last: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Committing the replacement for {period} failed; the period was left untouched.")]
    #[diagnostic(code(cur_rollup::replace::commit))]
    Commit {
        period: String,
        #[source]
        source: rusqlite::Error,
    },
}
