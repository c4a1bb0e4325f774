//! Ask command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::DocentError;
use crate::orchestrator::Orchestrator;
use crate::rag::format_sources;
use anyhow::Result;
use futures::StreamExt;

/// Run the ask command.
pub async fn run_ask(question: &str, k: Option<usize>, no_stream: bool, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Ask, &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings).await?;
    let engine = orchestrator.rag_engine();

    let spinner = Output::spinner("Searching documents...");
    let response = match engine.query(question, k).await {
        Ok(response) => response,
        Err(e) => {
            spinner.finish_and_clear();
            Output::error(&format!("Retrieval failed: {}", e));
            return Err(e.into());
        }
    };
    spinner.set_message("Generating answer...");

    let mut answer = response.answer;
    let mut failure = None;
    let mut first = true;
    let mut text = String::new();

    while let Some(item) = answer.next().await {
        match item {
            Ok(token) => {
                if first {
                    spinner.finish_and_clear();
                    println!();
                    first = false;
                }
                if no_stream {
                    text.push_str(&token);
                } else {
                    Output::token(&token);
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    spinner.finish_and_clear();

    if no_stream {
        print!("{}", text);
    }
    println!();

    if let Some(e) = failure {
        match &e {
            DocentError::GenerationTimeout(timeout) => Output::error(&format!(
                "The model did not respond within {}s. Try again or raise generation.timeout_seconds.",
                timeout.as_secs()
            )),
            _ => Output::error(&format!("Failed to generate answer: {}", e)),
        }
        return Err(e.into());
    }

    if response.grounded {
        println!("\n{}", format_sources(&response.citations));
    } else {
        Output::ungrounded_notice();
    }

    Ok(())
}
