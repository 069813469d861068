//! Basic usage example for redis-route
//!
//! Pass a connection string as the first argument, e.g.
//! `cargo run --example basic_usage -- "server=10.0.0.1:7000,10.0.0.2:7000;retry=5"`.

use redis_route::{cmd, Client, ConnectionConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let connection_string = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "redis://localhost:6379".to_string());
    let config = ConnectionConfig::parse(&connection_string)?;

    // Detects standalone, replication, sentinel or cluster on first use
    let client = Client::connect(config).await?;
    println!("Connected ({:?})", client.mode().await?);

    client.set("mykey", "Hello, Redis!").await?;
    if let Some(value) = client.get("mykey").await? {
        println!("GET mykey: {}", value);
    }

    client
        .set_ex("tempkey", "temporary value", Duration::from_secs(60))
        .await?;
    println!("TTL tempkey: {:?}", client.ttl("tempkey").await?);

    let value = client.incr_by("counter", 10).await?;
    println!("INCRBY counter: {}", value);

    // Writes are buffered and sent in one round-trip per node
    let mut pipeline = client.start_pipeline();
    let first = pipeline.incr("visits").await?;
    pipeline.expire("visits", Duration::from_secs(300)).await?;
    let mut results = pipeline.commit(true).await?;
    println!("visits: {}", results.take(first)?);

    // Arbitrary commands
    let size: i64 = client.execute(None, false, &cmd("DBSIZE")).await?;
    println!("DBSIZE: {}", size);

    for (endpoint, stats) in client.pool_stats().await? {
        println!("{}: {} open, {} idle", endpoint, stats.total, stats.idle);
    }

    // one key per call, so cluster deployments never see a cross-slot DEL
    for key in ["mykey", "tempkey", "counter", "visits"] {
        client.del(&[key]).await?;
    }
    Ok(())
}
