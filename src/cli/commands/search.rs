//! Search command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the search command.
///
/// Without `k`, returns `retrieval.default_k` results.
pub async fn run_search(query: &str, k: Option<usize>, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Search, &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let k = k.unwrap_or(settings.retrieval.default_k);
    let orchestrator = Orchestrator::new(settings).await?;

    let spinner = Output::spinner("Searching...");
    let results = orchestrator.index().search(query, k).await;
    spinner.finish_and_clear();

    let results = results?;
    if results.is_empty() {
        Output::info("No results found. Ingest some documents first.");
        return Ok(());
    }

    Output::header(&format!("Search results for: {}", query));
    for result in &results {
        Output::search_result(&result.chunk, result.score);
    }
    println!();

    Ok(())
}
