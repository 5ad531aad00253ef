pub mod materializer;
pub mod scheduler;

pub use scheduler::{
    format_interval, parse_interval, Aggregator, AggregatorConfig, FeedOutcome, FeedReport,
    IngestStats, TickReport,
};
