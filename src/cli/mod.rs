//! CLI module for docent.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// docent - ask questions about your own documents
///
/// Indexes plain-text and markdown files into a local embedding index and
/// answers questions with a streamed, source-cited response.
#[derive(Parser, Debug)]
#[command(name = "docent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "DOCENT_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and index documents (files or directories)
    Ingest {
        /// Files or directories to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Re-index documents that are already in the index
        #[arg(short, long)]
        reindex: bool,

        /// Drop the whole collection before ingesting
        #[arg(long)]
        clear: bool,
    },

    /// Ask a question and get an answer with sources
    Ask {
        /// The question to ask
        question: String,

        /// Number of chunks to retrieve (defaults to retrieval.default_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// Print the answer once it is complete instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Search for relevant chunks without generating an answer
    Search {
        /// Search query
        query: String,

        /// Maximum number of results (defaults to retrieval.default_k)
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// List indexed documents
    Sources,

    /// Show index statistics
    Stats,

    /// Remove every record from the collection
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Start HTTP API server for integration with other systems
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the current configuration to the config file
    Init,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from(["docent", "-vv", "ask", "How do loops work?", "-k", "3"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Ask { question, k, no_stream } => {
                assert_eq!(question, "How do loops work?");
                assert_eq!(k, Some(3));
                assert!(!no_stream);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_search_k_is_optional() {
        let cli = Cli::try_parse_from(["docent", "search", "loops"]).unwrap();
        assert!(matches!(cli.command, Commands::Search { k: None, .. }));

        let cli = Cli::try_parse_from(["docent", "search", "loops", "-k", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Search { k: Some(2), .. }));
    }

    #[test]
    fn test_ingest_requires_paths() {
        assert!(Cli::try_parse_from(["docent", "ingest"]).is_err());
    }
}
