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

//! # Preference Filter
//!
//! Hard constraints applied before scoring. Every configured constraint
//! excludes flights that fail it; unconfigured constraints pass everything.
//! Flights without any price pass only when no price cap is set.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::pipeline::scorer::{Priority, SeatSpecTable};
use crate::schemas::NormalizedFlight;

/// User preference profile: the hard constraints applied here plus the
/// soft knobs (priority, window, seat minimums) the scorer reuses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceConfig {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    /// When present, only these airline codes pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_airlines: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_airlines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stops: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_time_start: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_time_end: Option<NaiveTime>,
    /// When set, the departure window excludes instead of just scoring.
    #[serde(default)]
    pub hard_departure_window: bool,
    #[serde(default)]
    pub baggage_required: bool,
    #[serde(default)]
    pub meal_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_seat_pitch: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_seat_width: Option<f64>,
}

/// Apply the hard constraints, keeping input order.
pub fn apply_filter(
    flights: Vec<NormalizedFlight>,
    config: &PreferenceConfig,
    seat_specs: Option<&SeatSpecTable>,
) -> Vec<NormalizedFlight> {
    let before = flights.len();
    let kept: Vec<NormalizedFlight> = flights
        .into_iter()
        .filter(|f| passes(f, config, seat_specs))
        .collect();
    tracing::debug!("Preference filter kept {}/{before} flights", kept.len());
    kept
}

fn passes(
    flight: &NormalizedFlight,
    config: &PreferenceConfig,
    seat_specs: Option<&SeatSpecTable>,
) -> bool {
    if let Some(max_price) = config.max_price {
        match flight.lowest_price() {
            Some(price) if price <= max_price => {}
            // Priceless flights fail any configured price cap.
            _ => return false,
        }
    }

    if let Some(allowed) = &config.allowed_airlines {
        if !allowed.iter().any(|a| a == &flight.airline_code) {
            return false;
        }
    }
    if config.blocked_airlines.iter().any(|a| a == &flight.airline_code) {
        return false;
    }

    if let Some(max_stops) = config.max_stops {
        if flight.stops > max_stops {
            return false;
        }
    }

    if config.hard_departure_window {
        if let (Some(start), Some(end)) =
            (config.departure_time_start, config.departure_time_end)
        {
            let dep = flight.departure_time.time();
            let inside = if start <= end {
                start <= dep && dep <= end
            } else {
                dep >= start || dep <= end
            };
            if !inside {
                return false;
            }
        }
    }

    if config.baggage_required && !flight.prices.iter().any(|p| p.includes_baggage) {
        return false;
    }
    if config.meal_required && !flight.prices.iter().any(|p| p.includes_meal) {
        return false;
    }

    if config.min_seat_pitch.is_some() || config.min_seat_width.is_some() {
        if let Some(specs) = seat_specs {
            let key = format!(
                "{}_{}",
                flight.airline_code,
                flight.cabin_class.as_str_name()
            );
            if let Some(spec) = specs.get(&key) {
                if let Some(min_pitch) = config.min_seat_pitch {
                    if spec.seat_pitch_inches < min_pitch {
                        return false;
                    }
                }
                if let Some(min_width) = config.min_seat_width {
                    if spec.seat_width_inches < min_width {
                        return false;
                    }
                }
            }
            // Unknown products are kept: absence of data is not a failure.
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scorer::SeatSpec;
    use crate::schemas::{CabinClass, DataSource, NormalizedPrice};
    use chrono::{TimeZone, Utc};

    fn flight(airline: &str, stops: u32, price: Option<f64>) -> NormalizedFlight {
        let dep = Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap();
        let now = Utc::now();
        NormalizedFlight {
            flight_number: format!("{airline}123"),
            airline_code: airline.to_string(),
            airline_name: None,
            operator: airline.to_string(),
            origin: "ICN".to_string(),
            destination: "NRT".to_string(),
            departure_time: dep,
            arrival_time: dep + chrono::Duration::minutes(135),
            duration_minutes: 135,
            cabin_class: CabinClass::Economy,
            aircraft_type: None,
            stops,
            prices: price
                .map(|p| vec![NormalizedPrice::new(p, "KRW", DataSource::DirectCrawl, now)])
                .unwrap_or_default(),
            source: DataSource::DirectCrawl,
            source_tags: vec![DataSource::DirectCrawl],
            crawled_at: now,
        }
    }

    #[test]
    fn price_cap_excludes_expensive_and_priceless() {
        let config = PreferenceConfig {
            max_price: Some(200_000.0),
            ..Default::default()
        };
        let kept = apply_filter(
            vec![
                flight("KE", 0, Some(150_000.0)),
                flight("OZ", 0, Some(250_000.0)),
                flight("LJ", 0, None),
            ],
            &config,
            None,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].airline_code, "KE");
    }

    #[test]
    fn priceless_pass_without_price_cap() {
        let kept = apply_filter(
            vec![flight("LH", 0, None)],
            &PreferenceConfig::default(),
            None,
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn airline_lists_filter() {
        let config = PreferenceConfig {
            allowed_airlines: Some(vec!["KE".to_string(), "OZ".to_string()]),
            blocked_airlines: vec!["OZ".to_string()],
            ..Default::default()
        };
        let kept = apply_filter(
            vec![
                flight("KE", 0, Some(1.0)),
                flight("OZ", 0, Some(1.0)),
                flight("LJ", 0, Some(1.0)),
            ],
            &config,
            None,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].airline_code, "KE");
    }

    #[test]
    fn max_stops_excludes_connections() {
        let config = PreferenceConfig {
            max_stops: Some(0),
            ..Default::default()
        };
        let kept = apply_filter(
            vec![flight("KE", 0, Some(1.0)), flight("KE", 1, Some(1.0))],
            &config,
            None,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].stops, 0);
    }

    #[test]
    fn hard_window_excludes_outside_departures() {
        let config = PreferenceConfig {
            departure_time_start: Some(NaiveTime::from_hms_opt(14, 0, 0).unwrap()),
            departure_time_end: Some(NaiveTime::from_hms_opt(20, 0, 0).unwrap()),
            hard_departure_window: true,
            ..Default::default()
        };
        // Departure fixed at 09:00 in the fixture.
        assert!(apply_filter(vec![flight("KE", 0, Some(1.0))], &config, None).is_empty());
    }

    #[test]
    fn seat_spec_minimums_exclude_tight_products() {
        let mut specs = SeatSpecTable::new();
        specs.insert(
            "LJ_ECONOMY".to_string(),
            SeatSpec {
                seat_pitch_inches: 28.0,
                seat_width_inches: 17.0,
            },
        );
        let config = PreferenceConfig {
            min_seat_pitch: Some(31.0),
            ..Default::default()
        };
        let kept = apply_filter(
            vec![flight("LJ", 0, Some(1.0)), flight("KE", 0, Some(1.0))],
            &config,
            Some(&specs),
        );
        // LJ fails its known spec; KE has no spec and passes.
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].airline_code, "KE");
    }

    #[test]
    fn required_baggage_checks_any_price() {
        let mut with_bag = flight("KE", 0, Some(1.0));
        with_bag.prices[0].includes_baggage = true;
        let config = PreferenceConfig {
            baggage_required: true,
            ..Default::default()
        };
        let kept = apply_filter(
            vec![with_bag, flight("LJ", 0, Some(1.0))],
            &config,
            None,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].airline_code, "KE");
    }
}
