use std::borrow::Cow;
use std::sync::Arc;

use crate::config::columns::{
    Dimension, DimensionSource, PERIOD_START, RESOURCE_ID, RESOURCE_TAGS,
};
use crate::io::line_item::RawLineItem;
use crate::prelude::*;

use super::enricher::{self, AttributionSource};
use super::normalizer::{self, NormalizedDates};
use super::resolver::PatternResolver;

/// A line item with its derived fields. Lives only between enrichment and aggregation.
#[derive(Debug, Clone)]
pub struct EnrichedRecord {
    pub item: RawLineItem,
    pub dates: NormalizedDates,
    pub client: String,
    pub user: String,
    pub account_name: Arc<str>,
}

impl EnrichedRecord {
    /// Runs the normalizer, then the enricher. Returns which branch attributed the row.
    pub fn build(
        item: RawLineItem,
        resolver: &PatternResolver,
        account_name: &Arc<str>,
    ) -> (Self, AttributionSource) {
        let dates = normalizer::normalize(&item);
        let resource_id = item.get(RESOURCE_ID);
        let attribution = enricher::enrich(item.get(RESOURCE_TAGS), resource_id, resolver);

        if attribution.source == AttributionSource::Pattern {
            tracing::trace!(
                resource_id = resource_id.unwrap_or_default(),
                tag = %attribution.tag.encode(),
                "attributed line item from its resource id"
            );
        }

        let record = EnrichedRecord {
            item,
            dates,
            client: attribution.client,
            user: attribution.user,
            account_name: Arc::clone(account_name),
        };

        (record, attribution.source)
    }

    /// The key value for `dimension`, with `Unknown` standing in for anything missing.
    pub fn dimension(&self, dimension: &Dimension) -> Cow<'_, str> {
        let date = |moment: &Option<jiff::civil::DateTime>| match moment {
            Some(moment) => Cow::Owned(normalizer::render(moment)),
            None => Cow::Borrowed(UNKNOWN),
        };

        match dimension.source {
            DimensionSource::Column => {
                Cow::Borrowed(self.item.get(dimension.name).unwrap_or(UNKNOWN))
            }
            DimensionSource::Date if dimension.name == PERIOD_START => {
                date(&self.dates.period_start)
            }
            DimensionSource::Date => date(&self.dates.period_end),
            DimensionSource::EventDate => date(&self.dates.event_date),
            DimensionSource::Client => Cow::Borrowed(&self.client),
            DimensionSource::User => Cow::Borrowed(&self.user),
            DimensionSource::AccountName => Cow::Borrowed(&self.account_name),
        }
    }

    /// The measure cell as a number. Absent or unreadable cells count as zero.
    pub fn measure(&self, name: &str) -> f64 {
        self.item
            .get(name)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::columns::{DIMENSIONS, PERIOD_END, TIME_INTERVAL};
    use crate::io::line_item::Header;

    fn dimension(name: &str) -> &'static Dimension {
        DIMENSIONS.iter().find(|d| d.name == name).unwrap()
    }

    fn build(pairs: &[(&str, &str)]) -> EnrichedRecord {
        let header = Arc::new(Header::new(pairs.iter().map(|(column, _)| *column)));
        let item = RawLineItem::from_pairs(header, pairs);
        let resolver = PatternResolver::new(["clientX"]).unwrap();

        EnrichedRecord::build(item, &resolver, &Arc::from("acct")).0
    }

    #[test]
    fn dimensions_fall_back_to_unknown() {
        let record = build(&[("line_item_operation", "RunInstances"), ("pricing_term", "")]);

        assert_eq!(record.dimension(dimension("line_item_operation")), "RunInstances");
        assert_eq!(record.dimension(dimension("pricing_term")), UNKNOWN);
        assert_eq!(record.dimension(dimension("identity_date")), UNKNOWN);
        assert_eq!(record.dimension(dimension(PERIOD_START)), UNKNOWN);
        assert_eq!(record.dimension(dimension("account_name")), "acct");
    }

    #[test]
    fn derived_dimensions_come_from_the_normalizer_and_enricher() {
        let record = build(&[
            (TIME_INTERVAL, "2024-05-03T00:00:00Z/2024-05-04T00:00:00Z"),
            (PERIOD_START, "2024-05-01T00:00:00Z"),
            (PERIOD_END, "2024-06-01T00:00:00Z"),
            (RESOURCE_ID, "arn:aws:ec2:i-clientX"),
            (RESOURCE_TAGS, "{}"),
        ]);

        assert_eq!(record.dimension(dimension("identity_date")), "2024-05-03 00:00:00");
        assert_eq!(record.dimension(dimension(PERIOD_START)), "2024-05-01 00:00:00");
        assert_eq!(record.dimension(dimension(PERIOD_END)), "2024-06-01 00:00:00");
        assert_eq!(record.dimension(dimension("user_client")), "clientX");
        assert_eq!(record.dimension(dimension("user_name")), UNKNOWN);
    }

    #[test]
    fn measures_are_zero_filled() {
        let record = build(&[
            ("line_item_blended_cost", "1.25"),
            ("line_item_unblended_cost", "abc"),
            ("line_item_usage_amount", ""),
            ("line_item_blended_rate", "NaN"),
        ]);

        assert_eq!(record.measure("line_item_blended_cost"), 1.25);
        assert_eq!(record.measure("line_item_unblended_cost"), 0.0);
        assert_eq!(record.measure("line_item_usage_amount"), 0.0);
        assert_eq!(record.measure("line_item_blended_rate"), 0.0);
        assert_eq!(record.measure("line_item_unblended_rate"), 0.0);
    }
}
