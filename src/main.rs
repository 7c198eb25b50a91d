// src/main.rs
// =============================================================================
// This is the entry point of the crawl-pool CLI.
//
// What happens here:
// 1. Parse command-line arguments using clap
// 2. Build an engine configuration (config file + flags)
// 3. Launch the engine with HTTP sessions, enqueue the starting jobs
// 4. Wait until the engine is idle (or Ctrl-C), then close it
// 5. Print the results and exit with a proper code:
//    0 = everything OK, 1 = a job failed or a link is broken, 2 = error
// =============================================================================

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use crawl_pool::jobs::{self, LinkReport};
use crawl_pool::{logging, Engine, EngineConfig, ExecutionResult, HttpSessionFactory, Job, MemoryExporter};

use cli::{Cli, Commands};

// Columns written by --csv
const CRAWL_FIELDS: &[&str] = &[
    "request.url",
    "request.depth",
    "status",
    "payload.status",
    "payload.title",
    "duration_ms",
    "error.message",
];
const CHECK_FIELDS: &[&str] = &[
    "request.url",
    "status",
    "payload.status",
    "payload.message",
    "duration_ms",
    "error.message",
];

const DEFAULT_MAX_DEPTH: usize = 2;

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            // {:#} prints the whole context chain on one line
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Crawl {
            url,
            max_depth,
            max_requests,
            engine,
        } => {
            let mut config = engine.engine_config(CRAWL_FIELDS)?;
            config.max_depth = max_depth.or(config.max_depth).or(Some(DEFAULT_MAX_DEPTH));
            if max_requests.is_some() {
                config.max_requests = max_requests;
            }
            handle_crawl(&url, config, engine.json).await
        }
        Commands::Check { urls, engine } => {
            let config = engine.engine_config(CHECK_FIELDS)?;
            handle_check(urls, config, engine.json).await
        }
    }
}

// Handles the 'crawl' subcommand
async fn handle_crawl(url: &str, mut config: EngineConfig, json: bool) -> Result<i32> {
    let start = Url::parse(url).with_context(|| format!("invalid start URL '{url}'"))?;
    let host = start
        .host_str()
        .with_context(|| format!("start URL '{url}' has no host"))?;

    // Stay on the start host unless the config file says otherwise
    if config.allowed_domains.is_empty() {
        config.allowed_domains.push(host.to_string());
    }

    if !json {
        println!("🔍 Crawling website: {}", start);
        if let Some(depth) = config.max_depth {
            println!("📊 Max crawl depth: {}", depth);
        }
        println!("⚙️  Sessions: {}\n", config.concurrency);
    }

    let results = run_jobs(config, vec![Job::new(start.as_str(), jobs::site_crawl())]).await?;

    print_results(&results, json, describe_page)?;

    let failed = results.iter().filter(|r| !r.is_success()).count();
    Ok(if failed > 0 { 1 } else { 0 })
}

// Handles the 'check' subcommand
async fn handle_check(urls: Vec<String>, config: EngineConfig, json: bool) -> Result<i32> {
    if !json {
        println!("🌐 Checking {} link(s)...\n", urls.len());
    }

    let batch = urls
        .into_iter()
        .map(|url| Job::new(url, jobs::link_check()))
        .collect();
    let results = run_jobs(config, batch).await?;

    print_results(&results, json, describe_link)?;

    let broken = results.iter().filter(|r| !link_ok(r)).count();
    Ok(if broken > 0 { 1 } else { 0 })
}

// Launches an engine, runs `jobs` (and whatever they enqueue) to completion
// and returns every result in completion order.
async fn run_jobs(config: EngineConfig, jobs: Vec<Job>) -> Result<Vec<ExecutionResult>> {
    let factory = HttpSessionFactory::new(&config.http).context("could not build HTTP client")?;
    let memory = MemoryExporter::new();
    let engine = Engine::builder(factory)
        .config(config)
        .exporter(memory.clone())
        .launch()
        .await?;

    for job in jobs {
        engine.enqueue(job);
    }

    let interrupted = tokio::select! {
        _ = engine.on_idle() => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        // Queued jobs are dropped by close(); running ones finish first
        eprintln!("\n⏹️  Interrupted, waiting for running jobs (Ctrl-C again to quit now)...");
        tokio::select! {
            _ = engine.close() => {}
            _ = tokio::signal::ctrl_c() => std::process::exit(130),
        }
    } else {
        engine.close().await;
    }

    Ok(memory.results())
}

// Prints the results either as a table or JSON
fn print_results(
    results: &[ExecutionResult],
    json: bool,
    describe: fn(&ExecutionResult) -> (bool, String, String),
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
    } else {
        print_table(results, describe);
    }
    Ok(())
}

// Prints results as a human-readable table in the terminal
fn print_table(results: &[ExecutionResult], describe: fn(&ExecutionResult) -> (bool, String, String)) {
    println!("{:<60} {:<22} {:<30}", "URL", "STATUS", "MESSAGE");
    println!("{}", "=".repeat(112));

    let mut ok_count = 0;
    for result in results {
        let (ok, status, message) = describe(result);
        if ok {
            ok_count += 1;
        }
        println!("{:<60} {:<22} {:<30}", truncate(&result.request.url, 57), status, message);
    }

    println!();
    println!("📊 Summary:");
    println!("   ✅ OK: {}", ok_count);
    println!("   ❌ Broken: {}", results.len() - ok_count);
    println!("   📋 Total: {}", results.len());
}

// Truncates on a char boundary so multi-byte URLs don't panic
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

fn describe_page(result: &ExecutionResult) -> (bool, String, String) {
    match &result.error {
        None => {
            let title = result
                .payload
                .as_ref()
                .and_then(|p| p["title"].as_str())
                .unwrap_or("");
            (true, "✅ OK".to_string(), title.to_string())
        }
        Some(error) => (false, "❌ FAILED".to_string(), error.message.clone()),
    }
}

fn describe_link(result: &ExecutionResult) -> (bool, String, String) {
    match (link_report(result), &result.error) {
        (Some(report), _) => (
            report.is_ok(),
            report.status.label().to_string(),
            report.message.unwrap_or_default(),
        ),
        (None, Some(error)) => (false, "⚠️  ERROR".to_string(), error.message.clone()),
        (None, None) => (false, "⚠️  ERROR".to_string(), String::new()),
    }
}

fn link_report(result: &ExecutionResult) -> Option<LinkReport> {
    let payload = result.payload.clone()?;
    serde_json::from_value(payload).ok()
}

fn link_ok(result: &ExecutionResult) -> bool {
    link_report(result).is_some_and(|report| report.is_ok())
}


// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. Why is the engine in a library (src/lib.rs) and not here?
//    - main.rs is only one way to drive it; tests and other programs can
//      use the same engine with their own hooks and sessions
//
// 2. What does tokio::select! do?
//    - It waits on several futures at once and runs the branch of whichever
//      finishes first; the other future is dropped
//
// 3. Why pass `describe` as a function?
//    - crawl and check print the same table, they only differ in how a
//      result turns into a status and a message
// -----------------------------------------------------------------------------
