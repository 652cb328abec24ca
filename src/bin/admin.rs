use std::collections::VecDeque;
use std::io::Write;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;

use eventlog_sync::auth::derive_signing_key;
use eventlog_sync::infra::{EventSink, PgEventSink};

fn print_help() {
    eprintln!(
        "\
eventlog-sync-admin

USAGE:
  eventlog-sync-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations
  derive-identity                 Print the writer id for key material
  export-events                   Export synced events as NDJSON
  metrics-history                 Print persisted sync metrics windows

COMMON OPTIONS:
  --database-url <postgres_url>    (defaults to env DATABASE_URL)

derive-identity OPTIONS:
  --key <hex>                     (required, or env IDENTITY_KEY)

export-events OPTIONS:
  --from <ms>                     (optional) Minimum event timestamp
  --to <ms>                       (optional) Maximum event timestamp
  --output <path>                 (optional) Output file path (default: stdout)

metrics-history OPTIONS:
  --from <rfc3339>                (optional)
  --to <rfc3339>                  (optional)
  --limit <n>                     (default: 100)
"
    );
}

fn require_database_url(database_url: Option<String>) -> anyhow::Result<String> {
    database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required (or pass --database-url)"))
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

async fn connect(database_url: Option<String>) -> anyhow::Result<sqlx::PgPool> {
    let database_url = require_database_url(database_url)?;
    Ok(PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?)
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    data: serde_json::Value,
    timestamp: i64,
    metadata: serde_json::Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "migrate" => {
            let mut database_url: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(take_value(&mut args, &arg)?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let pool = connect(database_url).await?;
            eventlog_sync::migrations::run_postgres(&pool).await?;
            println!("ok: migrations applied");
            Ok(())
        }
        "derive-identity" => {
            let mut key: Option<String> = std::env::var("IDENTITY_KEY").ok();
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--key" => key = Some(take_value(&mut args, &arg)?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let key = key.ok_or_else(|| anyhow::anyhow!("--key is required"))?;
            let signing_key = derive_signing_key(&key)?;
            println!("id:         {}", signing_key.address());
            println!("public_key: {}", hex::encode(signing_key.public_key_bytes()));
            Ok(())
        }
        "export-events" => {
            let mut database_url: Option<String> = None;
            let mut from_ts: Option<i64> = None;
            let mut to_ts: Option<i64> = None;
            let mut output_path: Option<String> = None;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(take_value(&mut args, &arg)?),
                    "--from" => from_ts = Some(take_value(&mut args, &arg)?.parse()?),
                    "--to" => to_ts = Some(take_value(&mut args, &arg)?.parse()?),
                    "--output" => output_path = Some(take_value(&mut args, &arg)?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let pool = connect(database_url).await?;
            let rows: Vec<EventRow> = sqlx::query_as(
                r#"
                SELECT id, data, timestamp, metadata
                FROM events
                WHERE ($1::BIGINT IS NULL OR timestamp >= $1)
                  AND ($2::BIGINT IS NULL OR timestamp <= $2)
                ORDER BY timestamp ASC, id ASC
                "#,
            )
            .bind(from_ts)
            .bind(to_ts)
            .fetch_all(&pool)
            .await?;

            let mut out: Box<dyn Write> = match &output_path {
                Some(path) => Box::new(std::io::BufWriter::new(std::fs::File::create(path)?)),
                None => Box::new(std::io::stdout().lock()),
            };
            for row in &rows {
                let line = serde_json::json!({
                    "id": row.id,
                    "data": row.data,
                    "timestamp": row.timestamp,
                    "metadata": row.metadata,
                });
                writeln!(out, "{line}")?;
            }
            out.flush()?;
            eprintln!("ok: exported {} events", rows.len());
            Ok(())
        }
        "metrics-history" => {
            let mut database_url: Option<String> = None;
            let mut from: Option<DateTime<Utc>> = None;
            let mut to: Option<DateTime<Utc>> = None;
            let mut limit: usize = 100;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(take_value(&mut args, &arg)?),
                    "--from" => from = Some(take_value(&mut args, &arg)?.parse()?),
                    "--to" => to = Some(take_value(&mut args, &arg)?.parse()?),
                    "--limit" => limit = take_value(&mut args, &arg)?.parse()?,
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let sink = PgEventSink::new(connect(database_url).await?);
            for snapshot in sink.list_metrics(from, to, limit).await? {
                println!("{}", serde_json::to_string(&snapshot)?);
            }
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
