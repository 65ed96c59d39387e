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

//! Hard preference filtering followed by scoring, the way the search
//! pipeline chains them.
//!
//! Run with:
//!     cargo test --test t_preference_scoring

use chrono::{NaiveTime, TimeZone, Utc};
use skyfare_crawler::{
    CabinClass, DataSource, FlightScorer, NormalizedFlight, NormalizedPrice, PreferenceConfig,
    Priority, SeatSpec, SeatSpecTable, apply_filter,
};

fn flight(number: &str, airline: &str, dep_hour: u32, stops: u32, amount: f64) -> NormalizedFlight {
    let dep = Utc.with_ymd_and_hms(2026, 3, 15, dep_hour, 0, 0).unwrap();
    let now = Utc::now();
    NormalizedFlight {
        flight_number: number.to_string(),
        airline_code: airline.to_string(),
        airline_name: None,
        operator: airline.to_string(),
        origin: "ICN".to_string(),
        destination: "BKK".to_string(),
        departure_time: dep,
        arrival_time: dep + chrono::Duration::minutes(330),
        duration_minutes: 330,
        cabin_class: CabinClass::Economy,
        aircraft_type: None,
        stops,
        prices: vec![NormalizedPrice::new(amount, "KRW", DataSource::DirectCrawl, now)],
        source: DataSource::DirectCrawl,
        source_tags: vec![DataSource::DirectCrawl],
        crawled_at: now,
    }
}

#[test]
fn filter_then_score_ranks_surviving_flights() {
    let candidates = vec![
        flight("TG659", "TG", 9, 0, 420_000.0),
        flight("ZE511", "ZE", 9, 0, 180_000.0),
        flight("KE651", "KE", 22, 0, 380_000.0),
        flight("QR871", "QR", 9, 1, 510_000.0), // connection, filtered
    ];

    let config = PreferenceConfig {
        priority: Priority::Price,
        max_price: Some(500_000.0),
        max_stops: Some(0),
        ..Default::default()
    };

    let kept = apply_filter(candidates, &config, None);
    assert_eq!(kept.len(), 3);

    let scorer = FlightScorer::new(config);
    let scores = scorer.score_flights(&kept, None);
    let cheapest_index = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_score.partial_cmp(&b.1.total_score).unwrap())
        .unwrap()
        .0;
    assert_eq!(kept[cheapest_index].flight_number, "ZE511");
}

#[test]
fn time_window_prefers_inside_departures_with_time_priority() {
    let config = PreferenceConfig {
        priority: Priority::Time,
        departure_time_start: Some(NaiveTime::from_hms_opt(8, 0, 0).unwrap()),
        departure_time_end: Some(NaiveTime::from_hms_opt(12, 0, 0).unwrap()),
        ..Default::default()
    };
    // Same price, one inside the window and one 7+ hours past it.
    let inside = flight("TG659", "TG", 9, 0, 300_000.0);
    let outside = flight("TG661", "TG", 19, 0, 300_000.0);

    let scorer = FlightScorer::new(config);
    let scores = scorer.score_flights(&[inside, outside], None);
    assert_eq!(scores[0].time_score, 1.0);
    assert_eq!(scores[1].time_score, 0.0);
    assert!(scores[0].total_score > scores[1].total_score);
}

#[test]
fn seat_spec_constraints_filter_and_score_against_the_same_table() {
    let mut specs = SeatSpecTable::new();
    specs.insert(
        "ZE_ECONOMY".to_string(),
        SeatSpec {
            seat_pitch_inches: 28.0,
            seat_width_inches: 17.0,
        },
    );
    specs.insert(
        "TG_ECONOMY".to_string(),
        SeatSpec {
            seat_pitch_inches: 32.0,
            seat_width_inches: 18.0,
        },
    );

    let config = PreferenceConfig {
        priority: Priority::Comfort,
        min_seat_pitch: Some(31.0),
        ..Default::default()
    };

    let kept = apply_filter(
        vec![
            flight("ZE511", "ZE", 9, 0, 180_000.0),
            flight("TG659", "TG", 9, 0, 420_000.0),
        ],
        &config,
        Some(&specs),
    );
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].airline_code, "TG");

    let scorer = FlightScorer::new(config);
    let scores = scorer.score_flights(&kept, Some(&specs));
    // 32/31 capped at 1.0.
    assert_eq!(scores[0].comfort_score, 1.0);
}

#[test]
fn hard_window_excludes_while_soft_window_only_scores() {
    let flights = vec![flight("KE651", "KE", 22, 0, 380_000.0)];
    let window = (
        Some(NaiveTime::from_hms_opt(8, 0, 0).unwrap()),
        Some(NaiveTime::from_hms_opt(12, 0, 0).unwrap()),
    );

    let soft = PreferenceConfig {
        departure_time_start: window.0,
        departure_time_end: window.1,
        hard_departure_window: false,
        ..Default::default()
    };
    assert_eq!(apply_filter(flights.clone(), &soft, None).len(), 1);

    let hard = PreferenceConfig {
        hard_departure_window: true,
        ..soft
    };
    assert!(apply_filter(flights, &hard, None).is_empty());
}
