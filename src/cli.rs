//! Command-line interface definitions.
//!
//! Flags override the matching values from the YAML configuration. The API
//! key can also come from the environment.

use clap::Parser;
use std::path::PathBuf;

/// Extract article metadata from news URLs.
///
/// # Examples
///
/// ```sh
/// # Two URLs, results to stdout
/// awful_article_meta https://example.com/a https://example.com/b
///
/// # URLs from a file, a denylist of unscrapable sites, results to a file
/// awful_article_meta -i urls.txt -d denylist.txt -o results.json
///
/// # Rule-based URL inference only, more parallelism
/// awful_article_meta -i urls.txt --no-url-model --concurrency 5
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// URLs to process
    pub urls: Vec<String>,

    /// File with one URL per line (blank lines and `#` comments are skipped)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// File with origins that must not be scraped, one per line
    #[arg(short, long)]
    pub denylist: Option<PathBuf>,

    /// Optional path to config.yaml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of URLs processed at the same time
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Output JSON file (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Re-run failed URLs once after the batch
    #[arg(long)]
    pub retry_failed: bool,

    /// Use rule-based URL inference only, without the local model
    #[arg(long)]
    pub no_url_model: bool,

    /// API key for the metadata model
    #[arg(long, env = "ARTICLE_LLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

/// URLs from an input file's text: one per line, trimmed, skipping blank
/// lines and `#` comments.
pub fn parse_url_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "awful_article_meta",
            "https://example.com/a",
            "https://example.com/b",
            "--denylist",
            "deny.txt",
            "--output",
            "out.json",
        ]);

        assert_eq!(cli.urls, vec!["https://example.com/a", "https://example.com/b"]);
        assert_eq!(cli.denylist, Some(PathBuf::from("deny.txt")));
        assert_eq!(cli.output, Some(PathBuf::from("out.json")));
        assert!(!cli.no_url_model);
        assert!(!cli.retry_failed);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "awful_article_meta",
            "-i",
            "/tmp/urls.txt",
            "-c",
            "/tmp/config.yaml",
            "--concurrency",
            "5",
            "--no-url-model",
        ]);

        assert!(cli.urls.is_empty());
        assert_eq!(cli.input, Some(PathBuf::from("/tmp/urls.txt")));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.yaml")));
        assert_eq!(cli.concurrency, Some(5));
        assert!(cli.no_url_model);
    }

    #[test]
    fn test_parse_url_lines() {
        let text = "https://example.com/a\n\n  # comment\n  https://example.com/b  \n";
        assert_eq!(parse_url_lines(text), vec!["https://example.com/a", "https://example.com/b"]);
    }
}
