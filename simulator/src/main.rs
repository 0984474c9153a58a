mod telemetry;

use chrono::Utc;
use clap::Parser;
use std::time::{Duration, Instant};
use telemetry::{Telemetry, Vehicle};
use tracing::{error, info, warn};

/// Posts synthetic driving telemetry to the ingestion API.
#[derive(Parser, Debug)]
#[command(name = "simulator", about = "Driving telemetry simulator")]
struct Cli {
    /// Base URL of the API.
    #[arg(long, env = "API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Target readings per second across all devices.
    #[arg(long, env = "RATE", default_value_t = 100)]
    rate: u64,

    /// Number of simulated devices.
    #[arg(long, env = "DEVICES", default_value_t = 10)]
    devices: usize,

    /// Readings per upload request.
    #[arg(long, env = "BATCH", default_value_t = 50)]
    batch: usize,

    /// First device id; devices are numbered consecutively from here.
    #[arg(long, env = "FIRST_DEVICE_ID", default_value_t = 10000)]
    first_device_id: i64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let rate = cli.rate.max(1);
    let batch = cli.batch.max(1);
    let upload_url = format!("{}/upload", cli.api_url.trim_end_matches('/'));

    info!("Starting driving simulator");
    info!(
        "API: {}, Rate: {} readings/s, Devices: {}, Batch: {}",
        upload_url, rate, cli.devices, batch
    );

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return;
        }
    };

    let mut rng = rand::thread_rng();
    let mut vehicles: Vec<Vehicle> = (0..cli.devices.max(1))
        .map(|i| Vehicle::new(cli.first_device_id + i as i64, &mut rng))
        .collect();

    let burst_interval = Duration::from_millis((batch as u64 * 1000) / rate);
    info!(
        "Uploading batches of {} readings every {:?}",
        batch, burst_interval
    );

    let mut counter = 0u64;
    let mut next_vehicle = 0usize;

    loop {
        let burst_start = Instant::now();
        let now = Utc::now();

        let readings: Vec<Telemetry> = (0..batch)
            .map(|_| {
                let index = next_vehicle % vehicles.len();
                next_vehicle = next_vehicle.wrapping_add(1);
                vehicles[index].next_reading(&mut rng, now)
            })
            .collect();

        match client.post(&upload_url).json(&readings).send().await {
            Ok(resp) if resp.status().is_success() => {
                counter += readings.len() as u64;
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!("Upload rejected ({}): {}", status, body);
            }
            Err(e) => {
                warn!("Failed to upload: {}", e);
            }
        }

        if counter > 0 && counter % 10_000 < batch as u64 {
            info!("Uploaded {} readings", counter);
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!(
                "Upload took {:?}, target was {:?} - API may be overloaded",
                elapsed, burst_interval
            );
        }
    }
}
