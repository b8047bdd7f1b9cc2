//! Command-line client for the ringkv HTTP API.
//!
//! Talks to any node's HTTP front; the ring routes each key to its owner
//! internally. Supports batch operations (`put a=1,b=2`, `get a,b`) with
//! plain, JSON, or table output.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tabled::{Table, Tabled};

#[derive(Debug, Parser)]
#[command(name = "ringkv", version, about = "Client for the ringkv HTTP API")]
struct Cli {
    /// Action to perform.
    #[arg(value_enum)]
    action: Action,

    /// Key(s) to operate on: comma-separated keys, or key=value pairs
    /// for put.
    input: String,

    /// Base URL of any ring node's HTTP API.
    #[arg(long, default_value = "http://localhost:5000")]
    url: String,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    /// Print results as a table.
    #[arg(long)]
    table: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Action {
    Put,
    Get,
    Delete,
}

#[derive(Debug, Tabled)]
struct Row {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Split `key1=value1,key2=value2` into pairs. Every element must carry
/// an `=`; the value may contain further `=` characters.
fn parse_pairs(input: &str) -> Result<Vec<(String, String)>, String> {
    input
        .split(',')
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| format!("'{pair}' is not a valid key=value pair"))
        })
        .collect()
}

fn parse_keys(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

/// One key's outcome, as reported by the server.
async fn request_one(
    client: &reqwest::Client,
    base: &str,
    action: Action,
    key: &str,
    value: Option<&str>,
) -> serde_json::Value {
    let result = match action {
        Action::Put => {
            client
                .post(format!("{base}/put"))
                .json(&serde_json::json!({"key": key, "value": value.unwrap_or_default()}))
                .send()
                .await
        }
        Action::Get => client.get(format!("{base}/get/{key}")).send().await,
        Action::Delete => client.delete(format!("{base}/delete/{key}")).send().await,
    };
    match result {
        Ok(resp) => resp.json().await.unwrap_or_else(|e| {
            serde_json::json!({"status": "error", "message": format!("bad response: {e}")})
        }),
        Err(e) => serde_json::json!({"status": "error", "message": e.to_string()}),
    }
}

fn print_table(results: &serde_json::Map<String, serde_json::Value>) {
    let rows: Vec<Row> = results
        .iter()
        .map(|(key, outcome)| Row {
            key: key.clone(),
            value: outcome
                .get("value")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            status: outcome
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("N/A")
                .to_string(),
        })
        .collect();
    println!("{}", Table::new(rows));
}

fn print_plain(action: Action, results: &serde_json::Map<String, serde_json::Value>) {
    for (key, outcome) in results {
        let status = outcome
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("N/A");
        match action {
            Action::Get => match outcome.get("value").and_then(|v| v.as_str()) {
                Some(value) => println!("{key}: {value}"),
                None => println!("{key}: {status}"),
            },
            Action::Put | Action::Delete => println!("{key}: {status}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let base = cli.url.trim_end_matches('/').to_string();

    // (key, value) pairs; value is None for get/delete.
    let operations: Vec<(String, Option<String>)> = match cli.action {
        Action::Put => match parse_pairs(&cli.input) {
            Ok(pairs) => pairs.into_iter().map(|(k, v)| (k, Some(v))).collect(),
            Err(message) => {
                eprintln!("error: {message}");
                eprintln!("usage: ringkv put key1=value1[,key2=value2,...]");
                std::process::exit(1);
            }
        },
        Action::Get | Action::Delete => {
            let keys = parse_keys(&cli.input);
            if keys.is_empty() {
                eprintln!("error: no keys given");
                std::process::exit(1);
            }
            keys.into_iter().map(|k| (k, None)).collect()
        }
    };

    let client = reqwest::Client::new();
    let mut results = serde_json::Map::new();
    for (key, value) in &operations {
        let outcome = request_one(&client, &base, cli.action, key, value.as_deref()).await;
        results.insert(key.clone(), outcome);
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if cli.table {
        print_table(&results);
    } else {
        print_plain(cli.action, &results);
    }
    Ok(())
}
