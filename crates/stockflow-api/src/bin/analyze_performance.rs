// Read-only analysis of the performance_metrics table
//
// Usage: analyze-performance {summary|compare|errors|adoption|recent|cleanup} [merchant_id] [n]
//
// `cleanup` is the one write: it deletes rows older than n days (default 30).

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use uuid::Uuid;

use stockflow_storage::{Database, Gateway};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("warn")
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("summary");
    let merchant_id: Option<Uuid> = args.get(1).and_then(|s| s.parse().ok());
    let n: i64 = args
        .iter()
        .find_map(|s| s.parse().ok())
        .unwrap_or(match command {
            "cleanup" => 30,
            _ => 20,
        });

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let gateway = Gateway::connect(&database_url).await?;
    let db: Database = gateway.client().await?;

    match command {
        "summary" => summary(&db, merchant_id).await?,
        "compare" => compare(&db).await?,
        "errors" => errors(&db, n).await?,
        "adoption" => adoption(&db).await?,
        "recent" => recent(&db, n).await?,
        "cleanup" => cleanup(&db, n).await?,
        other => bail!("unknown command: {other} (expected summary|compare|errors|adoption|recent|cleanup)"),
    }
    Ok(())
}

async fn summary(db: &Database, merchant_id: Option<Uuid>) -> Result<()> {
    let since = Utc::now() - Duration::days(7);
    let rows = db.metric_summary(merchant_id, since).await?;
    println!("{:<28} {:<10} {:>8} {:>10} {:>10} {:>8}", "operation", "engine", "calls", "avg ms", "p95 ms", "errors");
    for row in rows {
        println!(
            "{:<28} {:<10} {:>8} {:>10.1} {:>10.1} {:>8}",
            row.operation,
            row.engine,
            row.calls,
            row.avg_duration_ms.unwrap_or(0.0),
            row.p95_duration_ms.unwrap_or(0.0),
            row.failures,
        );
    }
    Ok(())
}

/// Side-by-side latency of the two matching engines
async fn compare(db: &Database) -> Result<()> {
    let since = Utc::now() - Duration::days(7);
    let rows = db.metric_summary(None, since).await?;
    for engine in ["trigram", "jsmetric"] {
        let engine_rows: Vec<_> = rows.iter().filter(|r| r.engine == engine).collect();
        let calls: i64 = engine_rows.iter().map(|r| r.calls).sum();
        let avg = engine_rows
            .iter()
            .filter_map(|r| r.avg_duration_ms.map(|a| a * r.calls as f64))
            .sum::<f64>()
            / calls.max(1) as f64;
        println!("{engine:<10} calls={calls:<8} avg={avg:.1} ms");
    }
    Ok(())
}

async fn errors(db: &Database, n: i64) -> Result<()> {
    for row in db.recent_metric_errors(n).await? {
        println!(
            "{} merchant={} {}/{} {} ms {}",
            row.created_at.format("%Y-%m-%d %H:%M:%S"),
            row.merchant_id,
            row.operation,
            row.engine,
            row.duration_ms,
            row.metadata,
        );
    }
    Ok(())
}

async fn adoption(db: &Database) -> Result<()> {
    let since = Utc::now() - Duration::days(30);
    let rows = db.engine_adoption(since).await?;
    let total_calls: i64 = rows.iter().map(|r| r.calls).sum();
    for row in rows {
        let share = 100.0 * row.calls as f64 / total_calls.max(1) as f64;
        println!(
            "{:<10} calls={:<8} merchants={:<6} share={share:.1}%",
            row.engine, row.calls, row.merchants
        );
    }
    Ok(())
}

async fn recent(db: &Database, n: i64) -> Result<()> {
    for row in db.recent_metrics(n).await? {
        println!(
            "{} merchant={} {}/{} {} ms results={} success={}",
            row.created_at.format("%Y-%m-%d %H:%M:%S"),
            row.merchant_id,
            row.operation,
            row.engine,
            row.duration_ms,
            row.result_count,
            row.success,
        );
    }
    Ok(())
}

async fn cleanup(db: &Database, days: i64) -> Result<()> {
    let deleted = db.cleanup_metrics(days).await?;
    println!("deleted {deleted} metric rows older than {days} days");
    Ok(())
}
