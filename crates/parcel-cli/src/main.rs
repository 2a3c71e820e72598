//! `parcel` - command line front end for the logistics core.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use parcel_cli::sim::scenarios::{create_corridor_scenario, create_random_scenario, DEFAULT_CENTER};
use parcel_cli::{run_simulation, SimOptions};
use parcel_core::geo::distance_between;
use parcel_core::pricing::quote_named;
use parcel_core::{plan_route, within_radius, Coordinate, LogisticsConfig, Stop};
use parcel_station::config::load_logistics;
use parcel_station::Config;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON logistics configuration; falls back to PARCEL_CONFIG, then defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Great-circle distance between two points (km, 2 decimals)
    Distance {
        #[arg(allow_negative_numbers = true)]
        from_lat: f64,
        #[arg(allow_negative_numbers = true)]
        from_lon: f64,
        #[arg(allow_negative_numbers = true)]
        to_lat: f64,
        #[arg(allow_negative_numbers = true)]
        to_lon: f64,
    },
    /// Check whether a point lies within a radius of a center
    Within {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, allow_negative_numbers = true)]
        center_lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        center_lon: f64,
        #[arg(long)]
        radius_km: f64,
    },
    /// Quote a delivery fee
    Quote {
        #[arg(long)]
        distance_km: f64,
        /// small, medium, large or extra_large
        #[arg(long, default_value = "small")]
        size: String,
        #[arg(long, default_value_t = 0.0)]
        weight_kg: f64,
        #[arg(long, default_value = "Luanda")]
        region: String,
    },
    /// Plan a pickup-and-delivery route from a JSON array of stops
    Plan {
        #[arg(long)]
        stops: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        start_lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        start_lon: f64,
    },
    /// Drive a simulated courier through the tracking station
    Simulate {
        #[arg(long, value_enum, default_value = "random")]
        scenario: ScenarioType,

        /// Seed for the random scenario
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Number of deliveries in the random scenario
        #[arg(long, default_value_t = 5)]
        deliveries: usize,

        /// Scatter radius for the random scenario
        #[arg(long, default_value_t = 6.0)]
        radius_km: f64,

        /// Center latitude (default: Luanda)
        #[arg(long, default_value_t = DEFAULT_CENTER.0, allow_negative_numbers = true)]
        lat: f64,

        /// Center longitude (default: Luanda)
        #[arg(long, default_value_t = DEFAULT_CENTER.1, allow_negative_numbers = true)]
        lon: f64,

        #[arg(long, default_value_t = 25.0)]
        speed_kmh: f64,

        /// Simulated seconds between samples
        #[arg(long, default_value_t = 30.0)]
        step_secs: f64,

        /// Steps per wall-clock second; omit to run unthrottled
        #[arg(long)]
        rate: Option<f64>,
    },
}

/// Available simulation scenarios
#[derive(Debug, Clone, ValueEnum)]
enum ScenarioType {
    /// Seeded deliveries scattered around the center
    Random,
    /// Two crossing deliveries on an east-west corridor
    Corridor,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON result.
    let json_logs = std::env::var("PARCEL_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("parcel=info".parse()?))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_logistics(path)?,
        None => Config::from_env()?.logistics,
    };
    config.validate().context("invalid logistics configuration")?;

    match args.command {
        Command::Distance {
            from_lat,
            from_lon,
            to_lat,
            to_lon,
        } => {
            let km = distance_between(from_lat, from_lon, to_lat, to_lon)?;
            emit(&json!({ "distance_km": km }), args.pretty)
        }
        Command::Within {
            lat,
            lon,
            center_lat,
            center_lon,
            radius_km,
        } => {
            let point = Coordinate::new(lat, lon)?;
            let center = Coordinate::new(center_lat, center_lon)?;
            emit(
                &json!({ "within": within_radius(&center, &point, radius_km) }),
                args.pretty,
            )
        }
        Command::Quote {
            distance_km,
            size,
            weight_kg,
            region,
        } => {
            let quote = quote_named(&config.pricing, distance_km, &size, weight_kg, &region)?;
            emit(&quote, args.pretty)
        }
        Command::Plan {
            stops,
            start_lat,
            start_lon,
        } => {
            let raw = std::fs::read_to_string(&stops)
                .with_context(|| format!("reading stops {}", stops.display()))?;
            let stops: Vec<Stop> = serde_json::from_str(&raw).context("parsing stops")?;
            let start = Coordinate::new(start_lat, start_lon)?;
            let route = plan_route(&stops, start, &config.routing)?;
            tracing::info!(
                "Planned {} stops, {:.2} km",
                route.stops.len(),
                route.total_distance_km
            );
            emit(&route, args.pretty)
        }
        Command::Simulate {
            scenario,
            seed,
            deliveries,
            radius_km,
            lat,
            lon,
            speed_kmh,
            step_secs,
            rate,
        } => {
            let center = Coordinate::new(lat, lon)?;
            let scenario = match scenario {
                ScenarioType::Random => create_random_scenario(seed, deliveries, center, radius_km)?,
                ScenarioType::Corridor => create_corridor_scenario(center)?,
            };
            let opts = SimOptions {
                speed_kmh,
                step_secs,
                tick: rate
                    .filter(|r| r.is_finite() && *r > 0.0)
                    .map(|r| Duration::from_secs_f64(1.0 / r)),
                ..SimOptions::default()
            };
            let report = simulate(&scenario, config, &opts).await?;
            emit(&report, args.pretty)
        }
    }
}

async fn simulate(
    scenario: &parcel_cli::Scenario,
    config: LogisticsConfig,
    opts: &SimOptions,
) -> Result<parcel_cli::SimReport> {
    tracing::info!(
        "Simulating {} ({} deliveries, courier {})",
        scenario.name,
        scenario.deliveries.len(),
        scenario.courier_id
    );
    run_simulation(scenario, config, opts).await
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}
