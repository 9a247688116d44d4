//! Command-line interface definitions.
//!
//! The YAML config file describes a full run; flags override the parts that
//! typically change between runs.

use crate::config::SourceKind;
use clap::Parser;

/// Scrape Brazilian news about public figures, score sentiment and export a
/// spreadsheet.
///
/// # Examples
///
/// ```sh
/// # Everything from config.yaml
/// news_sentiment
///
/// # Override queries and sources
/// news_sentiment -c run.yaml -q "ELON MUSK" -q LULA -s g1 -s cnn
///
/// # Sentiment only, no Gemini calls
/// news_sentiment --no-summary -o ./out
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML run configuration
    #[arg(short, long, env = "NEWS_SENTIMENT_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Search term; repeat for several. Replaces the configured queries.
    #[arg(short, long = "query")]
    pub queries: Vec<String>,

    /// News source to search; repeat for several. Replaces the configured sources.
    #[arg(short, long = "source", value_enum)]
    pub sources: Vec<SourceKind>,

    /// Directory for the spreadsheet (and JSON, if enabled)
    #[arg(short, long)]
    pub output_dir: Option<String>,

    /// Skip summarization and score sentiment on article bodies
    #[arg(long)]
    pub no_summary: bool,
}
