//! `askbot ask`: run one question through the full pipeline from the CLI.
//!
//! The CLI goes through the same safety gate as HTTP callers, identified
//! as the authenticated user `cli` unless `--user` says otherwise.

use anyhow::Result;

use askbot_core::safety::Identity;

use crate::chat::ChatResponse;
use crate::config::Config;
use crate::engine::Engine;

pub async fn run_ask(
    config: &Config,
    query: &str,
    k: Option<i64>,
    user: Option<String>,
) -> Result<()> {
    let engine = Engine::from_config(config).await?;
    let identity = Identity::User(user.unwrap_or_else(|| "cli".to_string()));

    let response = engine.chat.ask(&identity, query, k).await?;
    print_response(&response);
    Ok(())
}

fn print_response(response: &ChatResponse) {
    println!("{}", response.answer);
    println!();

    if response.sources.is_empty() {
        println!("No sources.");
        return;
    }

    println!(
        "Sources ({}{}):",
        response.sources.len(),
        if response.redacted_sources { ", some redacted" } else { "" }
    );
    for (i, source) in response.sources.iter().enumerate() {
        match source.score {
            Some(score) => println!("{}. [{:.3}] {}", i + 1, score, source.title),
            None => println!("{}. {}", i + 1, source.title),
        }
        if let Some(url) = &source.url {
            println!("    url: {}", url);
        }
        println!("    > {}", source.snippet.replace('\n', " "));
    }
    println!();
    println!(
        "political: {}  time: {:.1} ms",
        response.meta.is_political, response.meta.response_time_ms
    );
}
