//! Seed a hazard server with random incident reports around a point.

use clap::Parser;
use hazard_cli::{scatter_reports, HazardClient};
use hazard_core::GeoPoint;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Post random incident reports to a hazard server
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server URL
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    /// Center latitude
    #[arg(long, default_value_t = 37.7749)]
    lat: f64,

    /// Center longitude
    #[arg(long, default_value_t = -122.4194)]
    lng: f64,

    /// Scatter radius in meters
    #[arg(long, default_value_t = 800.0)]
    spread: f64,

    /// Number of reports
    #[arg(long, default_value_t = 20)]
    count: usize,

    /// Report id prefix
    #[arg(long, default_value = "seed")]
    prefix: String,

    /// RNG seed for reproducible layouts
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = HazardClient::new(&args.url);

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let reports = scatter_reports(
        &mut rng,
        GeoPoint::new(args.lat, args.lng),
        args.spread,
        args.count,
        &args.prefix,
    );

    let mut accepted = 0usize;
    for report in &reports {
        match client.submit_report(report).await {
            Ok(()) => {
                accepted += 1;
                println!(
                    "{} {:<20} ({:.6}, {:.6})",
                    report.id,
                    report.title.as_deref().unwrap_or(""),
                    report.latitude,
                    report.longitude
                );
            }
            Err(e) => eprintln!("{e:#}"),
        }
    }

    println!("\nSeeded {accepted}/{} reports.", reports.len());
    Ok(())
}
