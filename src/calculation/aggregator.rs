use std::hash::Hasher;

use itertools::Itertools;
use twox_hash::XxHash64;

use crate::config::columns::{self, DIMENSIONS, MEASURES, Reduction};
use crate::error::Error;
use crate::io::line_item::Header;
use crate::prelude::*;

use super::record::EnrichedRecord;

/// One value per entry of `DIMENSIONS`, in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AggregateKey(Vec<String>);

impl AggregateKey {
    pub fn of(record: &EnrichedRecord) -> Self {
        AggregateKey(
            DIMENSIONS
                .iter()
                .map(|dimension| record.dimension(dimension).into_owned())
                .collect(),
        )
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    #[cfg(test)]
    pub fn get(&self, dimension: &str) -> Option<&str> {
        let index = DIMENSIONS.iter().position(|d| d.name == dimension)?;

        self.0.get(index).map(String::as_str)
    }
}

/// One reduced value per entry of `MEASURES`, in the same order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateValue(Vec<f64>);

impl AggregateValue {
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    #[cfg(test)]
    pub fn get(&self, measure: &str) -> Option<f64> {
        let index = MEASURES.iter().position(|m| m.name == measure)?;

        self.0.get(index).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRow {
    pub key: AggregateKey,
    pub value: AggregateValue,
    /// How many line items were folded into this row.
    pub line_items: usize,
}

/// Groups records by `AggregateKey` and reduces the measures of each group.
///
/// Costs and usage are summed, rates are averaged over every row of the group. Rows are
/// zero-filled before reduction, so a row without a rate still counts toward the mean.
///
/// Output is sorted by key. Inside a group the values are reduced in sorted order, which keeps
/// float sums bit-identical no matter how the input rows were ordered.
pub fn aggregate(header: &Header, records: &[EnrichedRecord]) -> AppResult<Vec<AggregatedRow>> {
    let missing = header.missing(columns::aggregation_inputs());
    if !missing.is_empty() {
        return Err(Error::SchemaMismatch { missing }.into());
    }

    let groups = records
        .iter()
        .map(|record| {
            let measures: Vec<f64> = MEASURES.iter().map(|m| record.measure(m.name)).collect();

            (AggregateKey::of(record), measures)
        })
        .into_group_map();

    let rows = groups
        .into_iter()
        .map(|(key, contributions)| AggregatedRow {
            key,
            value: reduce(&contributions),
            line_items: contributions.len(),
        })
        .sorted_by(|left, right| left.key.cmp(&right.key))
        .collect();

    Ok(rows)
}

/// Order-independent digest of an aggregated row set. Equal inputs give equal fingerprints.
pub fn fingerprint(rows: &[AggregatedRow]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);

    for row in rows.iter().sorted_by(|left, right| left.key.cmp(&right.key)) {
        for value in row.key.values() {
            hasher.write(value.as_bytes());
            // Separator, so ("ab", "c") and ("a", "bc") don't collide.
            hasher.write_u8(0x1f);
        }
        for value in row.value.values() {
            hasher.write_u64(value.to_bits());
        }
        hasher.write_u64(row.line_items as u64);
    }

    hasher.finish()
}

// private

fn reduce(contributions: &[Vec<f64>]) -> AggregateValue {
    let count = contributions.len() as f64;

    let reduced = MEASURES
        .iter()
        .enumerate()
        .map(|(index, measure)| {
            let total: f64 = contributions
                .iter()
                .map(|measures| measures[index])
                .sorted_by(f64::total_cmp)
                .sum();

            match measure.reduction {
                Reduction::Sum => total,
                Reduction::Mean => total / count,
            }
        })
        .collect();

    AggregateValue(reduced)
}
