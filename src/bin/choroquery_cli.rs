//! choroquery-cli — 对一份国家清单批量提问的命令行工具
//!
//! Usage:
//!   choroquery-cli ask <question> [--model <id>] [--countries <file>] [--concurrency <n>]
//!
//! Classifies the question, fans it out over the country list, and prints one
//! JSON line per country.

use choroquery::{AnswerService, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "ask" => {
            if let Err(e) = cmd_ask(&args[2..]).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        "version" | "--version" | "-V" => {
            println!("choroquery-cli {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"choroquery-cli — per-country LLM answers with coalescing and caching

USAGE:
    choroquery-cli ask <question> [OPTIONS]

OPTIONS:
    --model <id>          Model to query (default: gpt-3.5-turbo)
    --countries <file>    Newline-delimited country list (default: stdin)
    --concurrency <n>     Concurrent sub-queries (default: 8)

ENVIRONMENT:
    OPENAI_API_KEY          Upstream credential (or the OS keyring)
    REDIS_URL               Durable cache backend
    CHOROQUERY_NO_CACHE     Disable caching ("true" or "1")
    CHOROQUERY_BASE_URL     Upstream base url
    CHOROQUERY_TIMEOUT_SECS Upstream request timeout"#
    );
}

async fn cmd_ask(args: &[String]) -> choroquery::Result<()> {
    let question = match args.first() {
        Some(q) if !q.starts_with("--") => q.clone(),
        _ => {
            print_usage();
            std::process::exit(1);
        }
    };

    let mut model = "gpt-3.5-turbo".to_string();
    let mut countries_file: Option<String> = None;
    let mut concurrency = choroquery::service::DEFAULT_CONCURRENCY;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--model" if i + 1 < args.len() => {
                model = args[i + 1].clone();
                i += 2;
            }
            "--countries" if i + 1 < args.len() => {
                countries_file = Some(args[i + 1].clone());
                i += 2;
            }
            "--concurrency" if i + 1 < args.len() => {
                concurrency = args[i + 1].parse().unwrap_or(concurrency);
                i += 2;
            }
            other => {
                eprintln!("Unknown option: {other}");
                std::process::exit(1);
            }
        }
    }

    let countries = read_countries(countries_file.as_deref())?;
    if countries.is_empty() {
        eprintln!("no countries given");
        std::process::exit(1);
    }

    let settings = Settings::from_env()?;
    let service = AnswerService::from_settings(&settings).await?;
    tracing::info!(backend = service.cache_backend(), countries = countries.len(), "starting fan-out");

    let schema = service.classify(&model, &question).await?;
    tracing::info!(shape = schema.kind(), "question classified");

    for (country, result) in service
        .answer_many(&model, &question, &schema, &countries, concurrency)
        .await
    {
        match result {
            Ok(answer) => println!("{}", serde_json::to_string(&answer)?),
            Err(e) => println!(
                "{}",
                serde_json::json!({ "country": country, "error": e.to_string() })
            ),
        }
    }

    Ok(())
}

fn read_countries(path: Option<&str>) -> choroquery::Result<Vec<String>> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            use std::io::Read;
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
