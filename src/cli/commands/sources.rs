//! Sources command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the sources command.
pub async fn run_sources(settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings).await?;
    let sources = orchestrator.index().list_sources().await?;

    if sources.is_empty() {
        Output::info("No documents indexed yet.");
        Output::info("Use 'docent ingest <path>' to add some.");
        return Ok(());
    }

    Output::header(&format!("Indexed documents ({})", sources.len()));
    println!();
    for source in &sources {
        Output::source_info(
            source.title.as_deref().unwrap_or(&source.source_id),
            &source.source_id,
            source.chunk_count,
            source.total_chars,
        );
    }
    println!();

    Ok(())
}
