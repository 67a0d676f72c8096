use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config.host(host).port(port).dbname("adspace").user("adspace");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Run an INSERT and return the generated id from the echoed row.
async fn insert_id(client: &tokio_postgres::Client, sql: &str) -> String {
    let messages = client.simple_query(sql).await.unwrap();
    messages
        .iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("id").map(str::to_string),
            _ => None,
        })
        .expect("insert returned no row")
}

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + Days::new(offset)
}

async fn create_campaign(client: &tokio_postgres::Client, name: &str, start: NaiveDate, days: u64) -> String {
    let end = start + Days::new(days - 1);
    insert_id(
        client,
        &format!("INSERT INTO campaigns (name, start_date, end_date) VALUES ('{name}', '{start}', '{end}')"),
    )
    .await
}

async fn attach(client: &tokio_postgres::Client, campaign_id: &str, billboard_id: &str) -> bool {
    client
        .batch_execute(&format!(
            "INSERT INTO campaign_billboards (campaign_id, billboard_id) VALUES ('{campaign_id}', '{billboard_id}')"
        ))
        .await
        .is_ok()
}

async fn setup(client: &tokio_postgres::Client, n_billboards: usize) -> Vec<String> {
    let location = insert_id(
        client,
        "INSERT INTO locations (address, city, state, country_code, lat, lng) \
         VALUES ('1 Bench Way', 'Austin', 'TX', 'US', 30.27, -97.74)",
    )
    .await;

    let mut billboards = Vec::with_capacity(n_billboards);
    for i in 0..n_billboards {
        let price = 50.0 + i as f64;
        billboards.push(
            insert_id(
                client,
                &format!(
                    "INSERT INTO billboards (location_id, width_mt, height_mt, dollars_per_day) \
                     VALUES ('{location}', 14.6, 4.3, {price})"
                ),
            )
            .await,
        );
    }

    println!("  created 1 location, {} billboards", billboards.len());
    billboards
}

async fn phase1_sequential(host: &str, port: u16, billboard: &str) {
    let client = connect(host, port).await;

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        // Two-day campaigns with a one-day gap never overlap.
        let campaign = create_campaign(&client, &format!("seq{i}"), day(i as u64 * 3), 2).await;
        let t = Instant::now();
        assert!(attach(&client, &campaign, billboard).await, "sequential attach rejected");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} campaigns attached in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("attach latency", &mut latencies);
}

async fn phase2_contended(host: &str, port: u16, billboards: &[String]) {
    let n_tasks = 20;
    let rounds = 50;
    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();

    for t in 0..n_tasks {
        let host = host.to_string();
        let billboards = billboards.to_vec();
        let wins = wins.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for r in 0..rounds {
                // Every task races for the same window on the same billboard.
                let bb = &billboards[r % billboards.len()];
                let window = day(10_000 + r as u64 * 7);
                let campaign = create_campaign(&client, &format!("race{t}_{r}"), window, 5).await;
                if attach(&client, &campaign, bb).await {
                    wins.fetch_add(1, Ordering::Relaxed);
                } else {
                    conflicts.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * rounds;
    let won = wins.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {rounds} rounds = {total} attaches in {:.2}s ({won} booked, {} conflicts)",
        elapsed.as_secs_f64(),
        conflicts.load(Ordering::Relaxed),
    );
    if won != rounds {
        println!("  WARNING: expected exactly {rounds} winning attaches, got {won}");
    }
}

async fn phase3_availability_under_load(host: &str, port: u16, billboards: &[String]) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    // Writers keep booking fresh windows in the background.
    let mut writer_handles = Vec::new();
    for w in 0..4 {
        let host = host.to_string();
        let bb = billboards[w % billboards.len()].clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let window = day(20_000 + (w as u64 * 100_000) + i * 2);
                let campaign = create_campaign(&client, &format!("load{w}_{i}"), window, 1).await;
                let _ = attach(&client, &campaign, &bb).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        let bb = billboards[r % billboards.len()].clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader * 2);
            for i in 0..reads_per_reader {
                let s = day(i as u64 * 3);
                let e = s + Days::new(6);

                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE start_date = '{s}' AND end_date = '{e}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());

                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE billboard_id = '{bb}' \
                         AND start_date = '{s}' AND end_date = '{e}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..ops_per_conn {
                create_campaign(&client, &format!("storm{c}_{i}"), day(i), 1).await;
            }
            client
                .simple_query("SELECT * FROM campaigns LIMIT 10")
                .await
                .unwrap();
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ADSPACE_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ADSPACE_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ADSPACE_PORT");

    println!("=== adspace stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[setup]");
    let setup_client = connect(&host, port).await;
    let billboards = setup(&setup_client, 10).await;
    drop(setup_client);

    println!("\n[phase 1] sequential attach throughput");
    phase1_sequential(&host, port, &billboards[0]).await;

    println!("\n[phase 2] contended attaches");
    phase2_contended(&host, port, &billboards[1..]).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_availability_under_load(&host, port, &billboards).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
