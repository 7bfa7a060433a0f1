//! Simple example demonstrating the rate limiter functionality.

use quota_gate::{models, Context, Dimension, RateLimiter, RateLimiterConfig};
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const CONFIG: &str = r#"
provider: azure
max_wait: 10s
overrides:
  - resource: gpt-4
    requests_per_minute: 30
"#;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("a global tracing subscriber is already installed");
    }

    println!("Rate Limiter Example");
    println!("====================");

    let config = match RateLimiterConfig::from_yaml_str(CONFIG) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return;
        }
    };
    let limiter = match RateLimiter::from_config(&config) {
        Ok(Some(limiter)) => limiter,
        Ok(None) => {
            println!("Rate limiting is disabled");
            return;
        }
        Err(e) => {
            eprintln!("Failed to create rate limiter: {e}");
            return;
        }
    };

    let quota = limiter.quota_for(models::GPT4);
    println!("Quota for {}:", models::GPT4);
    println!("  Requests: {} per minute", quota.requests_per_minute);
    println!("  Tokens:   {} per minute", quota.units_per_minute);

    // The first 30 calls are a burst; the next two wait for refill
    let ctx = Context::background();
    let start = Instant::now();
    for call in 1..=32 {
        match limiter.wait(&ctx, models::GPT4, 200).await {
            Ok(()) => println!("call {call:2} admitted after {:?}", start.elapsed()),
            Err(e) => println!("call {call:2} rejected: {e}"),
        }
    }

    let tokens = limiter.gate(Dimension::Units, models::GPT4).available();
    println!("\nTokens left this minute: {tokens:.0}");

    match limiter.wait(&ctx, models::GPT4, 1_000_000).await {
        Ok(()) => println!("oversized call admitted"),
        Err(e) => println!("oversized call rejected: {e}"),
    }
}
