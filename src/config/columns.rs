/// Where a dimension value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionSource {
    /// Copied verbatim from the export column of the same name.
    Column,
    /// An export column that gets the parse-or-null date treatment.
    Date,
    /// Attribution from the tags or the pattern resolver.
    Client,
    User,
    /// The run's account scope.
    AccountName,
    /// Derived from `identity_time_interval`.
    EventDate,
}

#[derive(Debug)]
pub struct Dimension {
    pub name: &'static str,
    pub source: DimensionSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
}

#[derive(Debug)]
pub struct Measure {
    pub name: &'static str,
    pub reduction: Reduction,
}

pub const RESOURCE_ID: &str = "line_item_resource_id";
pub const RESOURCE_TAGS: &str = "resource_tags";
pub const TIME_INTERVAL: &str = "identity_time_interval";
pub const PERIOD_START: &str = "bill_billing_period_start_date";
pub const PERIOD_END: &str = "bill_billing_period_end_date";

/// Destination-only column holding the `YYYY-MM` the row belongs to.
pub const PERIOD_MONTH: &str = "period_month";

/// Tag keys read from (and written to) `resource_tags`.
pub const TAG_CLIENT: &str = "user_client";
pub const TAG_USER: &str = "user_name";

/// Export columns the enricher and the normalizer read, on top of the dimensions and measures.
pub static ENRICHMENT_INPUTS: &[&str] = &[RESOURCE_ID, RESOURCE_TAGS, TIME_INTERVAL];

/// The aggregate key, in key order. The order is also the destination column order.
pub static DIMENSIONS: &[Dimension] = &[
    Dimension {
        name: "bill_bill_type",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "bill_billing_entity",
        source: DimensionSource::Column,
    },
    Dimension {
        name: PERIOD_END,
        source: DimensionSource::Date,
    },
    Dimension {
        name: PERIOD_START,
        source: DimensionSource::Date,
    },
    Dimension {
        name: "line_item_availability_zone",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "line_item_currency_code",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "line_item_legal_entity",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "line_item_line_item_description",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "line_item_line_item_type",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "line_item_operation",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "line_item_product_code",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "line_item_tax_type",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "line_item_usage_account_id",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "line_item_usage_account_name",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "pricing_currency",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "pricing_term",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "pricing_unit",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_from_location",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_from_location_type",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_from_region_code",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_instance_family",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_instance_type",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_location",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_location_type",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_operation",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_product_family",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_region_code",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_servicecode",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_to_location",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_to_location_type",
        source: DimensionSource::Column,
    },
    Dimension {
        name: "product_to_region_code",
        source: DimensionSource::Column,
    },
    Dimension {
        name: TAG_CLIENT,
        source: DimensionSource::Client,
    },
    Dimension {
        name: TAG_USER,
        source: DimensionSource::User,
    },
    Dimension {
        name: "account_name",
        source: DimensionSource::AccountName,
    },
    Dimension {
        name: "identity_date",
        source: DimensionSource::EventDate,
    },
];

pub static MEASURES: &[Measure] = &[
    Measure {
        name: "line_item_blended_cost",
        reduction: Reduction::Sum,
    },
    Measure {
        name: "line_item_unblended_cost",
        reduction: Reduction::Sum,
    },
    Measure {
        name: "line_item_usage_amount",
        reduction: Reduction::Sum,
    },
    Measure {
        name: "line_item_blended_rate",
        reduction: Reduction::Mean,
    },
    Measure {
        name: "line_item_unblended_rate",
        reduction: Reduction::Mean,
    },
];

/// Export columns the aggregate key and values are read from, in declaration order.
pub fn aggregation_inputs() -> impl Iterator<Item = &'static str> {
    DIMENSIONS
        .iter()
        .filter(|dimension| {
            matches!(
                dimension.source,
                DimensionSource::Column | DimensionSource::Date
            )
        })
        .map(|dimension| dimension.name)
        .chain(MEASURES.iter().map(|measure| measure.name))
}

/// Every export column a run needs before it touches a single row.
pub fn required_inputs() -> impl Iterator<Item = &'static str> {
    aggregation_inputs().chain(ENRICHMENT_INPUTS.iter().copied())
}
