// src/cli.rs
// =============================================================================
// This file defines our command-line interface using the `clap` crate.
//
// Two subcommands, both running on the crawl engine:
// - crawl: follow links from a start page, staying on its host
// - check: report the status of each URL given
//
// The options shared by both (concurrency, timeouts, exporters, config file)
// live in EngineArgs and are flattened into each subcommand.
// =============================================================================

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crawl_pool::{EngineConfig, EngineError, SinkConfig};

// #[derive(Parser)] tells clap to generate the parsing code for us.
#[derive(Parser, Debug)]
#[command(
    name = "crawl-pool",
    version,
    about = "Crawl websites and check links with a bounded pool of sessions",
    long_about = "crawl-pool runs crawl jobs concurrently under a fixed session budget. \
                  Pages are visited once, results can be written to CSV or JSON lines, \
                  and the exit code tells CI whether anything failed."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log engine internals (dispatch, admission, idle transitions)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl a website, following links on the same host
    ///
    /// Example: crawl-pool crawl https://example.com --max-depth 3
    Crawl {
        /// Start page (e.g., https://example.com)
        url: String,

        /// Maximum crawl depth (default: 2)
        ///
        /// Depth 1 = just the start page
        /// Depth 2 = start page + all pages it links to
        #[arg(long)]
        max_depth: Option<usize>,

        /// Stop admitting pages after this many
        #[arg(long)]
        max_requests: Option<usize>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Check the status of one or more links
    ///
    /// Example: crawl-pool check https://example.com https://example.org/missing
    Check {
        /// URLs to check
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Load engine settings from a TOML file (flags override it)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of concurrent sessions
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-job timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Pause after each job, per session, in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Run jobs even when the same URL was seen before
    #[arg(long)]
    pub no_dedupe: bool,

    /// Also write results to this CSV file
    #[arg(long, value_name = "PATH")]
    pub csv: Option<PathBuf>,

    /// Also write results to this JSON-lines file
    #[arg(long, value_name = "PATH")]
    pub jsonl: Option<PathBuf>,

    /// Print results as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl EngineArgs {
    /// Builds the engine configuration: the config file (or defaults) with
    /// the flags applied on top. `csv_fields` are the columns of --csv.
    pub fn engine_config(&self, csv_fields: &[&str]) -> Result<EngineConfig, EngineError> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_toml_file(path)?,
            None => EngineConfig::default(),
        };

        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.job_timeout_ms = Some(timeout_ms);
        }
        if let Some(delay_ms) = self.delay_ms {
            config.delay_ms = delay_ms;
        }
        if self.no_dedupe {
            config.dedupe = false;
        }
        if let Some(path) = &self.csv {
            config.exporters.push(SinkConfig::Csv {
                path: path.clone(),
                fields: csv_fields.iter().map(|f| f.to_string()).collect(),
                separator: ",".to_string(),
            });
        }
        if let Some(path) = &self.jsonl {
            config.exporters.push(SinkConfig::JsonLines {
                path: path.clone(),
                fields: Vec::new(),
            });
        }

        config.validate()?;
        Ok(config)
    }
}


// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. What does #[command(flatten)] do?
//    - It splices the fields of another struct (EngineArgs) into this one
//    - Both subcommands get the same flags without repeating them
//
// 2. Why Option<usize> instead of a default value?
//    - None means "the user did not say", so the config file value survives
//    - A default_value_t would always overwrite the file
//
// 3. Why Vec<String> for urls?
//    - clap collects every remaining positional argument into the Vec
//    - required = true makes clap reject an empty list
// -----------------------------------------------------------------------------
