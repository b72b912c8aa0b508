use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::Semaphore;

#[derive(Parser)]
#[command(name = "order-load")]
#[command(about = "Drive traffic at the order service and report outcomes", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send POST /createOrder requests and tally the status codes
    Orders {
        #[arg(short = 'n', long, default_value_t = 100)]
        requests: u64,

        #[arg(short, long, default_value_t = 10)]
        concurrency: usize,
    },
    /// Send a single GET /checkInventory and print the response
    Inventory,
}

#[derive(Default)]
struct Tally {
    ok: AtomicU64,
    server_error: AtomicU64,
    other: AtomicU64,
    transport_error: AtomicU64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Orders { requests, concurrency } => {
            run_orders(&client, &cli.url, requests, concurrency.max(1)).await?;
        }
        Commands::Inventory => {
            let res = client.get(format!("{}/checkInventory", cli.url)).send().await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn run_orders(
    client: &reqwest::Client,
    url: &str,
    requests: u64,
    concurrency: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let tally = Arc::new(Tally::default());
    let permits = Arc::new(Semaphore::new(concurrency));
    let endpoint = format!("{}/createOrder", url);
    let started = Instant::now();

    let mut tasks = Vec::with_capacity(requests as usize);
    for _ in 0..requests {
        let permit = permits.clone().acquire_owned().await?;
        let client = client.clone();
        let endpoint = endpoint.clone();
        let tally = tally.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = permit;
            match client.post(&endpoint).send().await {
                Ok(res) if res.status().is_success() => tally.ok.fetch_add(1, Ordering::Relaxed),
                Ok(res) if res.status().is_server_error() => tally.server_error.fetch_add(1, Ordering::Relaxed),
                Ok(_) => tally.other.fetch_add(1, Ordering::Relaxed),
                Err(_) => tally.transport_error.fetch_add(1, Ordering::Relaxed),
            };
        }));
    }
    for task in tasks {
        task.await?;
    }

    let ok = tally.ok.load(Ordering::Relaxed);
    let failed = tally.server_error.load(Ordering::Relaxed);
    let answered = ok + failed;
    let rate = if answered == 0 { 0.0 } else { failed as f64 / answered as f64 * 100.0 };

    println!("Requests:        {}", requests);
    println!("Elapsed:         {:.2?}", started.elapsed());
    println!("200 OK:          {}", ok);
    println!("500 Error:       {}", failed);
    println!("Other status:    {}", tally.other.load(Ordering::Relaxed));
    println!("Transport error: {}", tally.transport_error.load(Ordering::Relaxed));
    println!("Failure rate:    {:.1}%", rate);
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(tp) = res.headers().get("traceparent") {
        println!("traceparent: {}", tp.to_str().unwrap_or("<invalid>"));
    }
    let body: Value = res.json().await?;
    println!("{} {}", status, serde_json::to_string_pretty(&body)?);
    Ok(())
}
