//! Ingest command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::{IngestStatus, Orchestrator};
use crate::source::discover;
use anyhow::Result;
use std::path::PathBuf;

/// Run the ingest command.
pub async fn run_ingest(paths: &[PathBuf], reindex: bool, clear: bool, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Ingest, &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings).await?;

    if clear {
        let removed = orchestrator.index().clear().await?;
        Output::info(&format!("Cleared {} records", removed));
    }

    let files = discover(paths)?;
    if files.is_empty() {
        Output::warning("No documents found.");
        return Ok(());
    }

    let pb = Output::progress_bar(files.len() as u64, "Indexing");
    let mut indexed = 0;
    let mut skipped = 0;
    let mut problems = Vec::new();

    for file in &files {
        pb.set_message(file.source_id.clone());

        let outcome = orchestrator.ingest_file(file, reindex).await?;
        match outcome.status {
            IngestStatus::Indexed { chunks, failed } => {
                indexed += 1;
                if failed > 0 {
                    problems.push(format!(
                        "{}: {} of {} chunks failed to embed",
                        outcome.source_id,
                        failed,
                        chunks + failed
                    ));
                }
            }
            IngestStatus::Skipped => skipped += 1,
            IngestStatus::Empty => problems.push(format!("{}: no text", outcome.source_id)),
            IngestStatus::Failed { reason } => problems.push(format!("{}: {}", outcome.source_id, reason)),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let stats = orchestrator.index().stats().await?;
    orchestrator.close().await?;

    Output::success(&format!(
        "Indexed {} of {} documents ({} chunks in index)",
        indexed,
        files.len(),
        stats.count
    ));
    if skipped > 0 {
        Output::info(&format!(
            "Skipped {} already indexed documents (use --reindex to replace them)",
            skipped
        ));
    }
    if !problems.is_empty() {
        Output::warning(&format!("{} documents had problems:", problems.len()));
        for problem in &problems {
            Output::list_item(problem);
        }
    }

    Ok(())
}
