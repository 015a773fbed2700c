pub mod aggregator;
pub mod enricher;
pub mod normalizer;
pub mod record;
pub mod period;
pub mod resolver;
pub mod run_report;
