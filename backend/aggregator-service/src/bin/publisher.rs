//! Demo load publisher: sends batches of events with a controlled share of
//! duplicates to a running aggregator.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "publisher")]
#[command(about = "Publish demo event batches to the aggregator", long_about = None)]
struct Args {
    /// Base URL of the aggregator service.
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    base_url: String,

    /// Number of events per batch. Accepts several values.
    #[arg(long, num_args = 1.., default_values_t = vec![5usize, 5000])]
    counts: Vec<usize>,

    /// Share of duplicates in each batch (0-1).
    #[arg(long, env = "DUPLICATES_RATIO", default_value_t = 0.2)]
    duplicates_ratio: f64,

    /// Topic for the generated events.
    #[arg(long, env = "PUBLISH_TOPIC", default_value = "load-test")]
    topic: String,
}

/// Number of distinct ids in a batch of `count` events.
fn unique_count(count: usize, duplicates_ratio: f64) -> usize {
    let unique = (count as f64 * (1.0 - duplicates_ratio)).floor();
    if unique.is_finite() && unique >= 1.0 {
        unique as usize
    } else {
        1
    }
}

/// Build `count` events whose ids cycle through `unique_count` values.
fn build_batch(count: usize, duplicates_ratio: f64, topic: &str) -> Vec<Value> {
    let unique = unique_count(count, duplicates_ratio);
    let now = Utc::now().to_rfc3339();

    (0..count)
        .map(|idx| {
            json!({
                "topic": topic,
                "event_id": format!("evt-{}", idx % unique),
                "timestamp": now,
                "source": "publisher-script",
                "payload": { "seq": idx },
            })
        })
        .collect()
}

async fn publish_batch(
    client: &reqwest::Client,
    base_url: &str,
    count: usize,
    duplicates_ratio: f64,
    topic: &str,
) -> Result<()> {
    let events = build_batch(count, duplicates_ratio, topic);
    let url = format!("{}/publish", base_url.trim_end_matches('/'));

    let start = Instant::now();
    let response = client
        .post(&url)
        .json(&events)
        .send()
        .await
        .with_context(|| format!("Failed to send batch to {}", url))?
        .error_for_status()
        .context("Aggregator rejected batch")?;
    let elapsed = start.elapsed();
    let body: Value = response.json().await.context("Invalid response body")?;

    println!(
        "Sent {} events (~{:.0}% duplicates) to {} in {:.2}s -> {}",
        count,
        duplicates_ratio * 100.0,
        base_url,
        elapsed.as_secs_f64(),
        body
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")?;

    for count in &args.counts {
        publish_batch(
            &client,
            &args.base_url,
            *count,
            args.duplicates_ratio,
            &args.topic,
        )
        .await?;
    }

    Ok(())
}
