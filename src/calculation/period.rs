use std::fmt;
use std::str::FromStr;

use jiff::ToSpan;
use jiff::civil::{Date, DateTime};

use crate::error::Error;
use crate::prelude::*;

/// A billing month, `YYYY-MM`. One run processes exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct BillingPeriod {
    year: i16,
    month: i8,
}

impl BillingPeriod {
    pub fn new(year: i16, month: i8) -> Result<Self, Error> {
        // Borrow jiff's range checks instead of writing our own.
        Date::new(year, month, 1).map_err(|_| Error::InvalidPeriod(format!("{year}-{month}")))?;

        Ok(BillingPeriod { year, month })
    }

    /// The month of the day before `run_date`. A run on the 1st closes out the previous month.
    pub fn preceding_day_of(run_date: Date) -> AppResult<Self> {
        let yesterday = run_date
            .checked_sub(1.day())
            .into_diagnostic()
            .wrap_err("Run date is out of range")?;

        Ok(BillingPeriod {
            year: yesterday.year(),
            month: yesterday.month(),
        })
    }

    pub fn contains(&self, moment: &DateTime) -> bool {
        moment.year() == self.year && moment.month() == self.month
    }
}

impl FromStr for BillingPeriod {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPeriod(raw.to_owned());

        let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;

        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }

        let year = year.parse::<i16>().map_err(|_| invalid())?;
        let month = month.parse::<i8>().map_err(|_| invalid())?;

        BillingPeriod::new(year, month).map_err(|_| invalid())
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl From<BillingPeriod> for String {
    fn from(period: BillingPeriod) -> Self {
        period.to_string()
    }
}
