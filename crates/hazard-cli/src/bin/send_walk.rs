//! Simulate one participant walking a circle and sharing their position.

use std::time::Duration;

use clap::Parser;
use hazard_cli::HazardClient;
use hazard_core::{CircularWalk, GeoPoint};
use tokio::time;

/// Send walking positions to a hazard server
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server URL
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    /// Entity id to share as
    #[arg(long, default_value = "walker-1")]
    entity: String,

    /// Center latitude
    #[arg(long, default_value_t = 37.7749)]
    lat: f64,

    /// Center longitude
    #[arg(long, default_value_t = -122.4194)]
    lng: f64,

    /// Circle radius in meters
    #[arg(long, default_value_t = 150.0)]
    radius: f64,

    /// Walking speed in m/s
    #[arg(long, default_value_t = 1.4)]
    speed: f64,

    /// Reported horizontal accuracy in meters
    #[arg(long)]
    accuracy: Option<f64>,

    /// Duration in seconds
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Update rate in Hz
    #[arg(long, default_value_t = 1.0)]
    rate: f64,

    /// Walk clockwise
    #[arg(long)]
    clockwise: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    anyhow::ensure!(args.rate > 0.0, "--rate must be positive");

    let client = HazardClient::new(&args.url);
    let walk = CircularWalk::new(GeoPoint::new(args.lat, args.lng), args.radius, args.speed)
        .with_start_angle(0.0, args.clockwise);

    println!("Walking as {} against {}", args.entity, client.base_url());
    println!("  Center: ({}, {})", args.lat, args.lng);
    println!("  Radius: {}m, Speed: {}m/s", args.radius, args.speed);
    println!("  Duration: {}s, Update rate: {}Hz", args.duration, args.rate);
    println!();

    let start = time::Instant::now();
    let mut sent = 0u32;
    let mut interval = time::interval(Duration::from_secs_f64(1.0 / args.rate));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > args.duration as f64 {
            break;
        }

        let point = walk.position_at(elapsed);
        match client.send_position(&args.entity, point, args.accuracy).await {
            Ok(ack) => {
                sent += 1;
                println!(
                    "[{:3}] ({:.6}, {:.6}) -> {}",
                    sent, point.lat, point.lng, ack.outcome
                );
            }
            Err(e) => eprintln!("Error sending position: {e:#}"),
        }
    }

    if let Err(e) = client.stop_sharing(&args.entity).await {
        eprintln!("Error withdrawing {}: {e:#}", args.entity);
    }
    println!("\nWalk complete. Sent {sent} position updates.");
    Ok(())
}
