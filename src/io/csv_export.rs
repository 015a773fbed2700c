use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::calculation::aggregator::AggregatedRow;
use crate::config::columns::{DIMENSIONS, MEASURES};
use crate::prelude::*;

/// Writes aggregated rows as CSV: every dimension column, then every measure column.
pub fn write_rows(path: &Path, rows: &[AggregatedRow]) -> AppResult<()> {
    let file = File::create(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to create {}", path.display()))?;

    write_to(file, rows)
}

/// Same layout as `write_rows`, into any writer.
pub fn write_to<W: Write>(destination: W, rows: &[AggregatedRow]) -> AppResult<()> {
    let mut writer = csv::Writer::from_writer(destination);

    let header = DIMENSIONS
        .iter()
        .map(|dimension| dimension.name)
        .chain(MEASURES.iter().map(|measure| measure.name));

    writer
        .write_record(header)
        .into_diagnostic()
        .wrap_err("Failed to write the CSV header")?;

    for row in rows {
        let measures = row.value.values().iter().map(|value| value.to_string());
        let record = row.key.values().iter().cloned().chain(measures);

        writer
            .write_record(record)
            .into_diagnostic()
            .wrap_err("Failed to serialize aggregated row to CSV format")?;
    }

    writer
        .flush()
        .into_diagnostic()
        .wrap_err("Failed to flush the aggregated rows")?;

    Ok(())
}
