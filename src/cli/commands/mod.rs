//! CLI command implementations.

mod ask;
mod clear;
mod config;
mod ingest;
mod search;
mod serve;
mod sources;
mod stats;

pub use ask::run_ask;
pub use clear::run_clear;
pub use config::run_config;
pub use ingest::run_ingest;
pub use search::run_search;
pub use serve::run_serve;
pub use sources::run_sources;
pub use stats::run_stats;
