//!  Skyfare Crawler
//!
//!  Copyright (C) 2026  Mamy Ratsimbazafy
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Operational CLI for the crawler fleet: single-source crawls, full
//! parallel sweeps with merge and scoring, and the aggregate health probe.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use skyfare_crawler::{
    CabinClass, Dispatcher, FlightScorer, NormalizedFlight, PassengerMix, PreferenceConfig,
    Priority, SearchRequest, config, merge_results,
};

#[derive(Parser, Debug)]
#[command(name = "skyfare-crawl")]
#[command(author, version, about = "Multi-source flight fare crawler", long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl one source for a route and date
    Crawl {
        /// Source name from the registry (e.g. google, air_busan)
        #[arg(short, long)]
        source: String,

        #[command(flatten)]
        search: SearchArgs,

        /// Print raw JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },
    /// Crawl every available source in parallel, merge, and rank
    CrawlAll {
        #[command(flatten)]
        search: SearchArgs,

        /// Scoring priority: price, time, comfort, balanced
        #[arg(long)]
        priority: Option<String>,

        /// Print raw JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },
    /// Probe sources; exits 1 if any probe fails
    Health {
        /// Probe only this source
        #[arg(short, long)]
        source: Option<String>,
    },
    /// List registered sources
    Sources,
}

#[derive(clap::Args, Debug)]
struct SearchArgs {
    /// Origin airport code (e.g. ICN)
    #[arg(short, long)]
    from: String,

    /// Destination airport code (e.g. NRT)
    #[arg(short, long)]
    to: String,

    /// Departure date (YYYY-MM-DD)
    #[arg(short, long)]
    date: String,

    /// Cabin class: economy, premium_economy, business, first
    #[arg(short, long, default_value = "economy")]
    cabin: String,

    /// Number of adult passengers
    #[arg(short, long, default_value = "1")]
    passengers: u8,

    /// ISO-4217 currency code (defaults to the configured one)
    #[arg(long)]
    currency: Option<String>,
}

/// Configure logging based on verbosity level
fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn parse_cabin(s: &str) -> Result<CabinClass> {
    CabinClass::from_str_name(s).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid cabin class: {}. Use: economy, premium_economy, business, first",
            s
        )
    })
}

fn build_request(args: &SearchArgs) -> Result<SearchRequest> {
    let date = NaiveDate::parse_from_str(&args.date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&args.date, "%Y/%m/%d"))
        .with_context(|| format!("Invalid date: {}", args.date))?;
    let mut builder = SearchRequest::builder(&args.from, &args.to, date)
        .cabin_class(parse_cabin(&args.cabin)?)
        .passengers(PassengerMix::adults(args.passengers));
    if let Some(currency) = &args.currency {
        builder = builder.currency(currency);
    }
    builder.build()
}

fn terminal_width() -> usize {
    term_size::dimensions().map(|(w, _)| w).unwrap_or(100)
}

fn print_flights_table(flights: &[NormalizedFlight]) {
    if flights.is_empty() {
        println!("No flights found.");
        return;
    }
    let width = terminal_width();
    println!(
        "{:<10} {:<8} {:<8} {:<17} {:<17} {:>6} {:>5} {:>14}  {}",
        "FLIGHT", "FROM", "TO", "DEPART", "ARRIVE", "DUR", "STOPS", "LOWEST", "SOURCES"
    );
    println!("{}", "-".repeat(width.min(100)));
    for f in flights {
        let lowest = f
            .lowest_price()
            .map(|p| format!("{p:.0}"))
            .unwrap_or_else(|| "-".to_string());
        let sources = f
            .source_tags
            .iter()
            .map(|s| s.as_str_name())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<10} {:<8} {:<8} {:<17} {:<17} {:>5}m {:>5} {:>14}  {}",
            f.flight_number,
            f.origin,
            f.destination,
            f.departure_time.format("%Y-%m-%d %H:%M"),
            f.arrival_time.format("%Y-%m-%d %H:%M"),
            f.duration_minutes,
            f.stops,
            lowest,
            sources
        );
    }
    println!("{} flights", flights.len());
}

async fn run_crawl(source: &str, search: &SearchArgs, json: bool) -> Result<()> {
    let request = build_request(search)?;
    let dispatcher = Dispatcher::from_settings(config::settings());
    let result = dispatcher.dispatch_single(&request, source).await?;
    dispatcher.close_all().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if !result.success {
        anyhow::bail!(
            "{source} crawl failed after {} ms: {}",
            result.duration_ms,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!(
        "{source}: {} flights in {} ms",
        result.flights.len(),
        result.duration_ms
    );
    print_flights_table(&result.flights);
    Ok(())
}

async fn run_crawl_all(
    search: &SearchArgs,
    priority: Option<&str>,
    json: bool,
) -> Result<()> {
    let request = build_request(search)?;
    let dispatcher = Dispatcher::from_settings(config::settings());
    let names = dispatcher.available_sources();
    tracing::info!("Dispatching {} sources", names.len());

    let results = dispatcher.dispatch_parallel(&request, &names).await;
    dispatcher.close_all().await;

    for r in &results {
        if !r.success {
            tracing::warn!(
                "{}: failed ({})",
                r.source.as_str_name(),
                r.error.as_deref().unwrap_or("unknown")
            );
        }
    }

    let merged = merge_results(&results);

    if let Some(priority) = priority {
        let priority = Priority::from_str_name(priority)
            .ok_or_else(|| anyhow::anyhow!("Invalid priority: {priority}"))?;
        let scorer = FlightScorer::new(PreferenceConfig {
            priority,
            ..Default::default()
        });
        let scores = scorer.score_flights(&merged, None);
        let mut ranked: Vec<_> = merged.iter().zip(scores.iter()).collect();
        ranked.sort_by(|a, b| {
            b.1.total_score
                .partial_cmp(&a.1.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if json {
            let out: Vec<serde_json::Value> = ranked
                .iter()
                .map(|(f, s)| serde_json::json!({"flight": f, "score": s}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            for (i, (f, s)) in ranked.iter().enumerate().take(20) {
                println!(
                    "#{:<3} {:<10} {} {}→{} total={:.4} (price={:.2} time={:.2})",
                    i + 1,
                    f.flight_number,
                    f.departure_time.format("%m-%d %H:%M"),
                    f.origin,
                    f.destination,
                    s.total_score,
                    s.price_score,
                    s.time_score
                );
            }
        }
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&merged)?);
    } else {
        print_flights_table(&merged);
    }
    Ok(())
}

async fn run_health(source: Option<&str>) -> Result<()> {
    let dispatcher = Dispatcher::from_settings(config::settings());
    let probes = dispatcher.health_all().await;
    dispatcher.close_all().await;

    let mut all_ok = true;
    for (name, healthy) in &probes {
        if let Some(filter) = source {
            if name != &filter {
                continue;
            }
        }
        println!("{:<22} {}", name, if *healthy { "OK" } else { "FAIL" });
        if !healthy {
            all_ok = false;
        }
    }
    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose);

    match &args.command {
        Command::Crawl { source, search, json } => run_crawl(source, search, *json).await,
        Command::CrawlAll {
            search,
            priority,
            json,
        } => run_crawl_all(search, priority.as_deref(), *json).await,
        Command::Health { source } => run_health(source.as_deref()).await,
        Command::Sources => {
            for spec in skyfare_crawler::sources::registry() {
                println!("{:<22} {:?}", spec.name, spec.layer);
            }
            Ok(())
        }
    }
}
