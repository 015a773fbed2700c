use std::collections::HashMap;
use std::sync::Arc;

use csv::StringRecord;

/// Column names of one export, shared by every row read from it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Header {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        // On duplicate names the first column wins, like most CSV readers do.
        let mut positions = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            positions.entry(name.clone()).or_insert(index);
        }

        Header { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    /// Returns the columns from `required` this header doesn't have, keeping their order.
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|column| !self.contains(column))
            .map(str::to_owned)
            .collect()
    }
}

/// One row of the export. Read-only once decoded.
#[derive(Debug, Clone)]
pub struct RawLineItem {
    header: Arc<Header>,
    values: StringRecord,
}

impl RawLineItem {
    pub fn new(header: Arc<Header>, values: StringRecord) -> Self {
        RawLineItem { header, values }
    }

    /// Handy for building rows by hand. Columns that aren't listed are absent.
    #[cfg(test)]
    pub fn from_pairs(header: Arc<Header>, pairs: &[(&str, &str)]) -> Self {
        let mut cells = vec![""; header.len()];
        for (column, value) in pairs {
            if let Some(index) = header.position(column) {
                cells[index] = value;
            }
        }

        RawLineItem::new(header, StringRecord::from(cells))
    }

    /// The cell for `column`, or `None` when the column is missing or the cell is empty.
    pub fn get(&self, column: &str) -> Option<&str> {
        let index = self.header.position(column)?;

        self.values.get(index).filter(|value| !value.is_empty())
    }
}
