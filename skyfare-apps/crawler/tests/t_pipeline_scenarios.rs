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

//! End-to-end pipeline scenarios over the public API: cross-source merge,
//! date separation, synthetic calendar rows, and the scorer's worked
//! example.
//!
//! Run with:
//!     cargo test --test t_pipeline_scenarios

use chrono::{DateTime, TimeZone, Utc};
use skyfare_crawler::{
    CabinClass, CrawlResult, DataSource, FlightScorer, NormalizedFlight, NormalizedPrice,
    PreferenceConfig, Priority, merge_results, synthetic_flight_number,
};

fn flight(
    number: &str,
    airline: &str,
    dep: DateTime<Utc>,
    duration: i64,
    source: DataSource,
    amounts: &[f64],
) -> NormalizedFlight {
    let now = Utc::now();
    NormalizedFlight {
        flight_number: number.to_string(),
        airline_code: airline.to_string(),
        airline_name: None,
        operator: airline.to_string(),
        origin: "ICN".to_string(),
        destination: "SIN".to_string(),
        departure_time: dep,
        arrival_time: dep + chrono::Duration::minutes(duration),
        duration_minutes: duration,
        cabin_class: CabinClass::Economy,
        aircraft_type: None,
        stops: 0,
        prices: amounts
            .iter()
            .map(|a| NormalizedPrice::new(*a, "KRW", source, now))
            .collect(),
        source,
        source_tags: vec![],
        crawled_at: now,
    }
}

fn assert_universal_invariants(f: &NormalizedFlight) {
    assert_eq!(f.origin.len(), 3);
    assert_eq!(f.destination.len(), 3);
    assert!(f.origin.bytes().all(|b| b.is_ascii_uppercase()));
    assert!(f.destination.bytes().all(|b| b.is_ascii_uppercase()));
    assert_ne!(f.origin, f.destination);
    assert!(f.duration_minutes >= 0);
    for p in &f.prices {
        assert!(p.amount > 0.0);
        assert!(!p.currency.is_empty());
    }
}

/// Scenario: the same SQ615 departure observed from two sources folds into
/// one flight with the union of prices and the trusted source's metadata.
#[test]
fn merge_across_sources_unions_prices_under_trust_order() {
    let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
    let from_google = flight("SQ615", "SQ", dep, 382, DataSource::GoogleProtobuf, &[800.0]);
    let from_crawl = flight(
        "SQ615",
        "SQ",
        dep,
        382,
        DataSource::DirectCrawl,
        &[820.0, 900.0],
    );

    let merged = merge_results(&[
        CrawlResult::ok(vec![from_google], DataSource::GoogleProtobuf, 1200),
        CrawlResult::ok(vec![from_crawl], DataSource::DirectCrawl, 2400),
    ]);

    assert_eq!(merged.len(), 1);
    let f = &merged[0];
    assert_universal_invariants(f);
    assert_eq!(f.prices.len(), 3);
    let mut amounts: Vec<f64> = f.prices.iter().map(|p| p.amount).collect();
    amounts.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(amounts, vec![800.0, 820.0, 900.0]);
    assert_eq!(f.source, DataSource::GoogleProtobuf);
    assert_eq!(f.lowest_price(), Some(800.0));
}

/// Scenario: identical flight numbers on different dates never collapse.
#[test]
fn dedup_does_not_collapse_different_dates() {
    let day1 = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
    let day2 = Utc.with_ymd_and_hms(2026, 3, 16, 8, 0, 0).unwrap();

    let merged = merge_results(&[
        CrawlResult::ok(
            vec![flight("SQ615", "SQ", day1, 382, DataSource::GoogleProtobuf, &[800.0])],
            DataSource::GoogleProtobuf,
            900,
        ),
        CrawlResult::ok(
            vec![flight("SQ615", "SQ", day2, 382, DataSource::DirectCrawl, &[820.0, 900.0])],
            DataSource::DirectCrawl,
            900,
        ),
    ]);

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].prices.len(), 1);
    assert_eq!(merged[1].prices.len(), 2);
}

/// Scenario: a synthetic calendar row passes every invariant, survives the
/// merger untouched, and scores as the sole candidate.
#[test]
fn synthetic_calendar_rows_flow_through_pipeline() {
    let dep = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let now = Utc::now();
    let synthetic = NormalizedFlight {
        flight_number: synthetic_flight_number("TW", "ICN", "NRT"),
        airline_code: "TW".to_string(),
        airline_name: Some("T'way Air".to_string()),
        operator: "TW".to_string(),
        origin: "ICN".to_string(),
        destination: "NRT".to_string(),
        departure_time: dep,
        arrival_time: dep,
        duration_minutes: 0,
        cabin_class: CabinClass::Economy,
        aircraft_type: None,
        stops: 0,
        prices: vec![NormalizedPrice::new(
            120_000.0,
            "KRW",
            DataSource::DirectCrawl,
            now,
        )],
        source: DataSource::DirectCrawl,
        source_tags: vec![],
        crawled_at: now,
    };
    assert_universal_invariants(&synthetic);
    assert!(synthetic.is_synthetic());

    let merged = merge_results(&[CrawlResult::ok(
        vec![synthetic],
        DataSource::DirectCrawl,
        700,
    )]);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].flight_number, "TW-ICNNRT");

    let scorer = FlightScorer::new(PreferenceConfig::default());
    let scores = scorer.score_flights(&merged, None);
    assert_eq!(scores[0].price_score, 1.0);
    assert_eq!(scores[0].time_score, 0.5);
    assert_eq!(scores[0].comfort_score, 0.5);
    assert_eq!(scores[0].service_score, 1.0);
}

/// Scenario: BALANCED profile over F1(100, LCC) and F2(150, FSC), both
/// departing 09:00 with no window configured.
#[test]
fn balanced_profile_worked_example() {
    let dep = Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap();
    let f1 = flight("TW231", "TW", dep, 135, DataSource::DirectCrawl, &[100.0]);
    let f2 = flight("SQ601", "SQ", dep, 135, DataSource::DirectCrawl, &[150.0]);

    let scorer = FlightScorer::new(PreferenceConfig {
        priority: Priority::Balanced,
        ..Default::default()
    });
    let scores = scorer.score_flights(&[f1, f2], None);

    assert!((scores[0].total_score - 0.7).abs() < 1e-9);
    assert!((scores[1].total_score - 0.445).abs() < 1e-9);
    assert!(scores[0].total_score > scores[1].total_score);

    for s in &scores {
        for sub in [
            s.price_score,
            s.time_score,
            s.comfort_score,
            s.service_score,
            s.reliability_score,
            s.total_score,
        ] {
            assert!((0.0..=1.0).contains(&sub));
        }
    }
}

/// Merged output always has pairwise-distinct dedup keys and sorts by
/// lowest price with priceless flights last.
#[test]
fn merge_output_ordering_and_key_uniqueness() {
    let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
    let dep2 = Utc.with_ymd_and_hms(2026, 3, 15, 11, 0, 0).unwrap();
    let merged = merge_results(&[CrawlResult::ok(
        vec![
            flight("KE905", "KE", dep2, 700, DataSource::DirectCrawl, &[1500.0]),
            flight("SQ615", "SQ", dep, 382, DataSource::DirectCrawl, &[900.0]),
            flight("LH712", "LH", dep, 745, DataSource::DirectCrawl, &[]),
        ],
        DataSource::DirectCrawl,
        1000,
    )]);

    let keys: Vec<String> = merged.iter().map(|f| f.dedup_key()).collect();
    let mut unique = keys.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), keys.len());

    assert_eq!(merged[0].flight_number, "SQ615");
    assert_eq!(merged.last().unwrap().lowest_price(), None);
}
