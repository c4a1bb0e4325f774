//! Clear command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use console::Term;

/// Run the clear command.
pub async fn run_clear(yes: bool, settings: Settings) -> Result<()> {
    let collection = settings.index.collection.clone();

    if !yes {
        print!("Remove every record from collection '{}'? [y/N] ", collection);
        std::io::Write::flush(&mut std::io::stdout())?;
        let answer = Term::stdout().read_line()?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            Output::info("Aborted.");
            return Ok(());
        }
    }

    let orchestrator = Orchestrator::new(settings).await?;
    let removed = orchestrator.index().clear().await?;
    orchestrator.close().await?;

    Output::success(&format!("Removed {} records from '{}'", removed, collection));
    Ok(())
}
