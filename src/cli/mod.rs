//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "knowbase",
    version,
    about = "Index local text documents and search them by meaning",
    long_about = "Knowbase chunks the plain-text documents in a directory, embeds them, and keeps \
                  them in a persistent vector index. Searches return a diversified set of passages \
                  using Maximal Marginal Relevance."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/knowbase/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the index, or load it if it already exists
    Index {
        /// Re-read every document and replace the index contents
        #[arg(short, long)]
        force: bool,
    },

    /// Search indexed documents
    Search {
        /// Search query text
        query: String,

        /// Number of results to return
        #[arg(short)]
        k: Option<usize>,

        /// Number of nearest candidates to consider
        #[arg(long)]
        fetch_k: Option<usize>,

        /// Relevance/diversity trade-off between 0 and 1
        #[arg(long)]
        lambda: Option<f32>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Add files to the index without rebuilding it
    Add {
        /// Text files to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove every entry from the index
    Reset,

    /// Show document and index statistics
    Stats {
        /// Show statistics in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Save and list notes
    Notes {
        #[command(subcommand)]
        action: NotesAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum NotesAction {
    /// Save a note
    Save {
        /// Note title (at most 100 characters)
        #[arg(short, long)]
        title: String,

        /// Note body
        #[arg(long)]
        content: String,
    },

    /// List saved notes, oldest first
    List,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_arguments() {
        let cli = Cli::try_parse_from([
            "knowbase", "search", "neural networks", "-k", "2", "--fetch-k", "8", "--lambda", "0.3",
        ])
        .unwrap();

        match cli.command {
            Commands::Search {
                query,
                k,
                fetch_k,
                lambda,
                json,
            } => {
                assert_eq!(query, "neural networks");
                assert_eq!(k, Some(2));
                assert_eq!(fetch_k, Some(8));
                assert_eq!(lambda, Some(0.3));
                assert!(!json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_add_requires_files() {
        assert!(Cli::try_parse_from(["knowbase", "add"]).is_err());
    }
}
