//! Command-line interface definitions for news_sync.
//!
//! Secrets can be provided via flags but are normally read from the
//! environment (`NEWS_API_KEY`, `TABULA_KEY`, `FIVETRAN_API_KEY`).
//!
//! ```sh
//! # Run one incremental sync into ./sync_output
//! news_sync sync -c sync.yaml
//!
//! # Print the destination table schema
//! news_sync schema
//!
//! # Generate configuration.json and deploy the connector
//! news_sync deploy --destination warehouse --connection news_articles
//! ```

use crate::config::Overrides;
use crate::deploy::DeployRequest;
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch, enrich and upsert new articles, then advance the cursor
    Sync(SyncArgs),
    /// Print the destination table schema as JSON
    Schema,
    /// Generate the connector configuration and deploy it
    Deploy(DeployArgs),
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Optional path to the YAML sync config
    #[arg(short, long, env = "NEWS_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding table files and the cursor state
    #[arg(short, long, default_value = "./sync_output")]
    pub output_dir: PathBuf,

    /// NewsAPI key
    #[arg(long, env = "NEWS_API_KEY", hide_env_values = true)]
    pub news_api_key: Option<String>,

    /// Tabula Lingua key; enrichment is skipped without it
    #[arg(long, env = "TABULA_KEY", hide_env_values = true)]
    pub tabula_key: Option<String>,

    /// Topics as a JSON list or comma separated; overrides the config file
    #[arg(short, long, env = "NEWS_SYNC_TOPICS")]
    pub topics: Option<String>,

    /// Articles per page (1-100)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Maximum pages fetched per topic
    #[arg(long)]
    pub max_pages: Option<usize>,
}

impl SyncArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            news_api_key: self.news_api_key.clone(),
            enrichment_api_key: self.tabula_key.clone(),
            topics: self.topics.clone(),
            page_size: self.page_size,
            max_pages: self.max_pages,
        }
    }
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Committed, non-secret connector settings
    #[arg(long, default_value = "base_config.json")]
    pub base_config: PathBuf,

    /// Secrets merged into the configuration under camelCase keys
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Where the merged configuration is written
    #[arg(short, long, default_value = "configuration.json")]
    pub output: PathBuf,

    /// Destination name on the connector platform
    #[arg(long, env = "FIVETRAN_DESTINATION")]
    pub destination: String,

    /// Connection name on the connector platform
    #[arg(long, env = "FIVETRAN_CONNECTION")]
    pub connection: String,

    /// Platform API key
    #[arg(long, env = "FIVETRAN_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Platform CLI executable
    #[arg(long, default_value = "fivetran")]
    pub program: String,

    /// Directory containing the connector project
    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    /// Only write the configuration file
    #[arg(long)]
    pub dry_run: bool,
}

impl From<DeployArgs> for DeployRequest {
    fn from(args: DeployArgs) -> Self {
        DeployRequest {
            base_config: args.base_config,
            env_file: args.env_file,
            output: args.output,
            program: args.program,
            api_key: args.api_key.map(SecretString::new),
            destination: args.destination,
            connection: args.connection,
            project_dir: args.project_dir,
            dry_run: args.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_parsing() {
        let cli = Cli::parse_from([
            "news_sync",
            "sync",
            "--config",
            "./sync.yaml",
            "--output-dir",
            "/tmp/out",
            "--topics",
            "climate,energy",
            "--page-size",
            "2",
        ]);

        let Command::Sync(args) = cli.command else {
            panic!("expected sync subcommand");
        };
        assert_eq!(args.config, Some(PathBuf::from("./sync.yaml")));
        assert_eq!(args.output_dir, PathBuf::from("/tmp/out"));
        let overrides = args.overrides();
        assert_eq!(overrides.topics.as_deref(), Some("climate,energy"));
        assert_eq!(overrides.page_size, Some(2));
    }

    #[test]
    fn test_sync_short_flags() {
        let cli = Cli::parse_from(["news_sync", "sync", "-c", "a.yaml", "-o", "out", "-t", "ai"]);
        let Command::Sync(args) = cli.command else {
            panic!("expected sync subcommand");
        };
        assert_eq!(args.config, Some(PathBuf::from("a.yaml")));
        assert_eq!(args.output_dir, PathBuf::from("out"));
        assert_eq!(args.topics.as_deref(), Some("ai"));
    }

    #[test]
    fn test_deploy_parsing_and_defaults() {
        let cli = Cli::parse_from([
            "news_sync",
            "deploy",
            "--destination",
            "warehouse",
            "--connection",
            "news_articles",
            "--dry-run",
        ]);
        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy subcommand");
        };
        let req = DeployRequest::from(args);
        assert_eq!(req.base_config, PathBuf::from("base_config.json"));
        assert_eq!(req.env_file, PathBuf::from(".env"));
        assert_eq!(req.output, PathBuf::from("configuration.json"));
        assert_eq!(req.program, "fivetran");
        assert_eq!(req.destination, "warehouse");
        assert!(req.dry_run);
    }

    #[test]
    fn test_schema_subcommand() {
        let cli = Cli::parse_from(["news_sync", "schema"]);
        assert!(matches!(cli.command, Command::Schema));
    }
}
