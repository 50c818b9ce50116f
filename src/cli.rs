//! Command-line interface definitions for news_ingest.
//!
//! Every option can also come from an environment variable. Values given
//! here override the matching fields of the YAML config file.

use clap::Parser;

/// Command-line arguments for one ingestion run.
///
/// # Examples
///
/// ```sh
/// # Run with the config file and its defaults
/// news_ingest -c ./config.yaml
///
/// # Cap the run and only accept articles from 2024 on
/// news_ingest -c ./config.yaml --articles-limit 50 --date-threshold 2024-01-01
///
/// # Write a machine-readable run summary
/// news_ingest -c ./config.yaml --summary-json ./out/last_run.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "NEWS_INGEST_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Storage file; overrides `db_path` from the config
    #[arg(long, env = "NEWS_INGEST_DB")]
    pub db_path: Option<String>,

    /// Stop dispatching new article fetches after this many
    #[arg(short = 'n', long)]
    pub articles_limit: Option<usize>,

    /// Skip articles published before this date (RFC 3339 or YYYY-MM-DD)
    #[arg(short, long)]
    pub date_threshold: Option<String>,

    /// Also write the run summary as JSON to this path
    #[arg(long)]
    pub summary_json: Option<String>,

    /// Keep everything in memory; the storage file is not touched
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["news_ingest"]);
        assert_eq!(cli.config, "config.yaml");
        assert!(cli.articles_limit.is_none());
        assert!(cli.summary_json.is_none());
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "news_ingest",
            "-c",
            "/etc/news/config.yaml",
            "-n",
            "25",
            "-d",
            "2024-01-01",
            "--dry-run",
        ]);

        assert_eq!(cli.config, "/etc/news/config.yaml");
        assert_eq!(cli.articles_limit, Some(25));
        assert_eq!(cli.date_threshold.as_deref(), Some("2024-01-01"));
        assert!(cli.dry_run);
    }

    #[test]
    fn test_cli_rejects_bad_limit() {
        assert!(Cli::try_parse_from(["news_ingest", "--articles-limit", "many"]).is_err());
    }
}
