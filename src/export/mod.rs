//! Markdown and PDF files derived from extracted pages

mod aggregator;
mod buckets;
pub mod filename;
mod region;
pub mod template;

pub use aggregator::{AggregateError, MarkdownAggregator, load_bucket_config};
pub use buckets::{Bucket, BucketConfig, DEFAULT_PLANNER_YEAR, REFLECT_SECTION};
pub use filename::sanitize_filename;
pub use region::{RegionMarkers, RegionUpdate, upsert_region};
pub use template::TemplateEngine;
