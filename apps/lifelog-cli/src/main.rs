use std::env;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use lifelog_core::clock::SystemClock;
use lifelog_core::config::{expand_path, Config};
use lifelog_core::store::JsonDirStore;
use lifelog_core::types::SearchStrategy;
use lifelog_query::{QueryClassifier, QueryDecomposer, QueryPreprocessor};
use lifelog_search::{SearchOptions, SearchOrchestrator, UnifiedSearchResult};

const USAGE: &str = "Usage: lifelog <index|query|classify|decompose|preprocess> [args...]

  index      [--data <dir>]                 build the index and print stats
  query      \"<query>\" [--data <dir>] [--strategy <fast|vector|hybrid|reasoning|parallel>]
             [--limit <n>] [--threshold <x>] [--parallel] [--expand] [--no-cache] [--no-decompose]
             [--timeout-ms <n>] [--table]
  classify   \"<query>\"                      print the query type and routing
  decompose  \"<query>\"                      print sub-queries and execution order
  preprocess \"<query>\"                      print resolved dates, entities and variants";

struct Args {
    command: String,
    query: Option<String>,
    data_dir: Option<String>,
    table: bool,
    options: SearchOptions,
}

fn exit_with(message: &str) -> ! {
    eprintln!("Error: {message}");
    eprintln!("{USAGE}");
    std::process::exit(1)
}

fn parse_args() -> Args {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let command = args.remove(0);
    let mut parsed = Args { command, query: None, data_dir: None, table: false, options: SearchOptions::default() };

    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| args.get(i + 1).cloned().unwrap_or_else(|| exit_with(&format!("{} requires a value", args[i])));
        match args[i].as_str() {
            "--data" | "-d" => {
                parsed.data_dir = Some(value(i));
                i += 1;
            }
            "--strategy" | "-s" => {
                let strategy = value(i).parse::<SearchStrategy>().unwrap_or_else(|e| exit_with(&e.to_string()));
                parsed.options.strategy = Some(strategy);
                i += 1;
            }
            "--limit" | "-n" => {
                parsed.options.limit = value(i).parse().unwrap_or_else(|_| exit_with("--limit requires a number"));
                i += 1;
            }
            "--threshold" => {
                parsed.options.score_threshold =
                    value(i).parse().unwrap_or_else(|_| exit_with("--threshold requires a number"));
                i += 1;
            }
            "--timeout-ms" => {
                let ms: u64 = value(i).parse().unwrap_or_else(|_| exit_with("--timeout-ms requires a number"));
                parsed.options.timeout = Some(Duration::from_millis(ms));
                i += 1;
            }
            "--table" => parsed.table = true,
            "--parallel" => parsed.options.enable_parallel = true,
            "--expand" => parsed.options.enable_query_expansion = true,
            "--no-cache" => parsed.options.enable_cache = false,
            "--no-decompose" => parsed.options.enable_decomposition = false,
            arg if !arg.starts_with('-') && parsed.query.is_none() => parsed.query = Some(arg.to_string()),
            other => exit_with(&format!("unknown argument '{other}'")),
        }
        i += 1;
    }
    parsed
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    pb
}

fn print_table(result: &UnifiedSearchResult) {
    println!("{:>3}  {:>7}  {:<10}  {:<24}  {}", "#", "score", "date", "id", "title");
    for (i, r) in result.results.iter().enumerate() {
        let date = r.date().map(|d| d.to_string()).unwrap_or_default();
        let title = r.document.as_ref().map_or("", |d| d.title.as_str());
        println!("{:>3}  {:>7.4}  {:<10}  {:<24}  {}", i + 1, r.score, date, r.id, title);
        for highlight in &r.highlights {
            println!("{:>48}  📝 {}", "", highlight);
        }
    }
    if let Some(summary) = &result.summary {
        println!("\nSummary: {summary}");
    }
    for insight in &result.insights {
        println!("💡 {insight}");
    }
}

fn require_query(args: &Args) -> &str {
    args.query.as_deref().unwrap_or_else(|| exit_with(&format!("{} requires a query", args.command)))
}

fn orchestrator(config: &Config, args: &Args) -> anyhow::Result<SearchOrchestrator> {
    let engine = config.engine()?;
    let dir = args.data_dir.clone().unwrap_or_else(|| engine.data.documents_dir.clone());
    let store = JsonDirStore::open(expand_path(&dir))?;
    tracing::info!(documents_dir = %store.root().display(), "opening lifelog store");
    Ok(SearchOrchestrator::builder(Arc::new(store)).config(engine).build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let args = parse_args();
    let engine_config = config.engine()?;

    match args.command.as_str() {
        "index" => {
            let search = orchestrator(&config, &args)?;
            let pb = spinner("Indexing lifelogs...");
            let report = search.initialize().await;
            pb.finish_and_clear();
            let report = report?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            eprintln!("✅ Indexed {} lifelogs", report.index.documents);
        }
        "query" => {
            let query = require_query(&args);
            let search = orchestrator(&config, &args)?;
            let pb = spinner("Indexing lifelogs...");
            let init = search.initialize().await;
            pb.finish_and_clear();
            init?;
            let result = search.search(query, &args.options).await?;
            if args.table {
                print_table(&result);
            } else {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            eprintln!(
                "🔍 {} results via {} in {} ms",
                result.results.len(),
                result.strategy,
                result.performance.total_time_ms
            );
            search.close().await;
        }
        "classify" => {
            let classifier = QueryClassifier::new(Arc::new(SystemClock), engine_config.classifier);
            let classification = classifier.classify(require_query(&args));
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        "decompose" => {
            let decomposed = QueryDecomposer::new(engine_config.decomposer).decompose(require_query(&args));
            println!("{}", serde_json::to_string_pretty(&decomposed)?);
        }
        "preprocess" => {
            let preprocessed = QueryPreprocessor::new(Arc::new(SystemClock)).preprocess(require_query(&args));
            println!("{}", serde_json::to_string_pretty(&preprocessed)?);
        }
        other => exit_with(&format!("unknown command '{other}'")),
    }
    Ok(())
}
