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

//! # Flight Scorer
//!
//! Weighted multi-factor ranking of merged flights against a preference
//! profile. Five subscores in [0, 1] (price, time, comfort, service,
//! reliability), combined with profile weights summing to 1.0.

use std::collections::HashMap;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::pipeline::preference_filter::PreferenceConfig;
use crate::schemas::NormalizedFlight;

/// What the traveler optimizes for; selects the weight row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Price,
    Time,
    Comfort,
    Balanced,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Balanced
    }
}

impl Priority {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "price" => Some(Priority::Price),
            "time" => Some(Priority::Time),
            "comfort" => Some(Priority::Comfort),
            "balanced" => Some(Priority::Balanced),
            _ => None,
        }
    }

    /// Weight rows; each sums to 1.0.
    fn weights(&self) -> Weights {
        match self {
            Priority::Price => Weights {
                price: 0.50,
                time: 0.20,
                comfort: 0.10,
                service: 0.10,
                reliability: 0.10,
            },
            Priority::Time => Weights {
                price: 0.15,
                time: 0.45,
                comfort: 0.10,
                service: 0.10,
                reliability: 0.20,
            },
            Priority::Comfort => Weights {
                price: 0.15,
                time: 0.10,
                comfort: 0.45,
                service: 0.20,
                reliability: 0.10,
            },
            Priority::Balanced => Weights {
                price: 0.30,
                time: 0.25,
                comfort: 0.20,
                service: 0.10,
                reliability: 0.15,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Weights {
    price: f64,
    time: f64,
    comfort: f64,
    service: f64,
    reliability: f64,
}

/// Seat geometry for one `{airline_code}_{cabin_class}` product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeatSpec {
    pub seat_pitch_inches: f64,
    pub seat_width_inches: f64,
}

/// External seat-spec table keyed by `{airline_code}_{CABIN_CLASS}`.
pub type SeatSpecTable = HashMap<String, SeatSpec>;

/// Detailed score breakdown for a single flight. All subscores and the
/// total are rounded to 4 decimal places.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub price_score: f64,
    pub time_score: f64,
    pub comfort_score: f64,
    pub service_score: f64,
    pub reliability_score: f64,
    pub total_score: f64,
    pub priority: Priority,
}

/// Airline business-model classification driving the reliability base.
/// Unlisted carriers score a neutral 0.5.
fn airline_reliability_base(airline_code: &str) -> f64 {
    const FSC: &[&str] = &[
        "SQ", "LH", "LX", "OS", "SN", "CX", "TG", "QR", "EK", "NH", "JL", "KE", "OZ", "TK", "AF",
        "KL", "NZ", "LO", "ET", "MH", "PR", "VN", "HU", "BR", "MU", "CA",
    ];
    const LCC: &[&str] = &["7C", "LJ", "TW", "ZE", "BX", "RS", "YP", "MM", "4U", "TR"];
    const ULCC: &[&str] = &["F9", "NK", "VJ", "5J"];

    if FSC.contains(&airline_code) {
        0.8
    } else if LCC.contains(&airline_code) {
        0.5
    } else if ULCC.contains(&airline_code) {
        0.3
    } else {
        0.5
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Scores flights against a preference profile and weight row.
pub struct FlightScorer {
    config: PreferenceConfig,
    weights: Weights,
}

impl FlightScorer {
    pub fn new(config: PreferenceConfig) -> Self {
        let weights = config.priority.weights();
        Self { config, weights }
    }

    /// Score a candidate set. Price normalization is relative to this set:
    /// cheapest flight scores 1.0, most expensive 0.0.
    pub fn score_flights(
        &self,
        flights: &[NormalizedFlight],
        seat_specs: Option<&SeatSpecTable>,
    ) -> Vec<ScoreBreakdown> {
        if flights.is_empty() {
            return Vec::new();
        }

        let prices: Vec<f64> = flights.iter().filter_map(|f| f.lowest_price()).collect();
        let min_price = prices.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_price = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let price_range = if prices.is_empty() {
            0.0
        } else {
            max_price - min_price
        };

        flights
            .iter()
            .map(|flight| {
                let price_score = match flight.lowest_price() {
                    Some(p) => Self::score_price(p, min_price, price_range),
                    // Schedule-only rows have nothing to normalize.
                    None => 0.5,
                };
                let time_score = self.score_time(flight);
                let comfort_score = self.score_comfort(flight, seat_specs);
                let service_score = self.score_service(flight);
                let reliability_score = self.score_reliability(flight);

                let total = self.weights.price * price_score
                    + self.weights.time * time_score
                    + self.weights.comfort * comfort_score
                    + self.weights.service * service_score
                    + self.weights.reliability * reliability_score;

                ScoreBreakdown {
                    price_score: round4(price_score),
                    time_score: round4(time_score),
                    comfort_score: round4(comfort_score),
                    service_score: round4(service_score),
                    reliability_score: round4(reliability_score),
                    total_score: round4(total),
                    priority: self.config.priority,
                }
            })
            .collect()
    }

    /// Min-max normalization: cheapest = 1.0, most expensive = 0.0.
    fn score_price(price: f64, min_price: f64, price_range: f64) -> f64 {
        if price_range == 0.0 {
            return 1.0;
        }
        1.0 - (price - min_price) / price_range
    }

    /// 1.0 inside the preferred departure window, linear decay to 0 over
    /// 6 hours from the nearest edge, 0.5 when no window is configured.
    fn score_time(&self, flight: &NormalizedFlight) -> f64 {
        let (Some(start), Some(end)) = (
            self.config.departure_time_start,
            self.config.departure_time_end,
        ) else {
            return 0.5;
        };

        let dep = flight.departure_time.time();
        if time_in_range(start, end, dep) {
            return 1.0;
        }
        let hours_away = hours_from_range(start, end, dep);
        (1.0 - hours_away / 6.0).max(0.0)
    }

    /// Average over configured seat constraints of `min(actual/required, 1)`.
    /// 0.5 when no spec is known or no constraint is configured.
    fn score_comfort(
        &self,
        flight: &NormalizedFlight,
        seat_specs: Option<&SeatSpecTable>,
    ) -> f64 {
        let Some(specs) = seat_specs else { return 0.5 };
        let key = format!(
            "{}_{}",
            flight.airline_code,
            flight.cabin_class.as_str_name()
        );
        let Some(spec) = specs.get(&key) else { return 0.5 };

        let mut scores = Vec::new();
        if let Some(min_pitch) = self.config.min_seat_pitch {
            scores.push((spec.seat_pitch_inches / min_pitch).min(1.0));
        }
        if let Some(min_width) = self.config.min_seat_width {
            scores.push((spec.seat_width_inches / min_width).min(1.0));
        }
        if scores.is_empty() {
            return 0.5;
        }
        scores.iter().sum::<f64>() / scores.len() as f64
    }

    /// 0.5 contribution each for baggage and meal: granted outright when not
    /// required, granted when any observed price includes the service.
    fn score_service(&self, flight: &NormalizedFlight) -> f64 {
        if !self.config.baggage_required && !self.config.meal_required {
            return 1.0;
        }

        let has_baggage = flight.prices.iter().any(|p| p.includes_baggage);
        let has_meal = flight.prices.iter().any(|p| p.includes_meal);

        let mut score = 0.0;
        if self.config.baggage_required {
            score += if has_baggage { 0.5 } else { 0.0 };
        } else {
            score += 0.5;
        }
        if self.config.meal_required {
            score += if has_meal { 0.5 } else { 0.0 };
        } else {
            score += 0.5;
        }
        score
    }

    /// Airline-class base (FSC 0.8 / LCC 0.5 / ULCC 0.3), plus 0.2 capped at
    /// 1.0 when more than one source confirmed the flight in the merge.
    fn score_reliability(&self, flight: &NormalizedFlight) -> f64 {
        let mut score = airline_reliability_base(&flight.airline_code);
        if flight.sources_merged() > 1 {
            score = (score + 0.2).min(1.0);
        }
        score
    }
}

/// Is `t` within `[start, end]`, treating start > end as an overnight
/// window (e.g. 22:00–06:00)?
fn time_in_range(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
    if start <= end {
        start <= t && t <= end
    } else {
        t >= start || t <= end
    }
}

/// Hours from `t` to the nearest edge of the window; 0 inside it.
fn hours_from_range(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> f64 {
    let t_mins = (t.hour() * 60 + t.minute()) as i64;
    let start_mins = (start.hour() * 60 + start.minute()) as i64;
    let end_mins = (end.hour() * 60 + end.minute()) as i64;

    let dist = if start_mins <= end_mins {
        if t_mins < start_mins {
            start_mins - t_mins
        } else if t_mins > end_mins {
            t_mins - end_mins
        } else {
            0
        }
    } else if t_mins > end_mins && t_mins < start_mins {
        (t_mins - end_mins).min(start_mins - t_mins)
    } else {
        0
    };

    dist as f64 / 60.0
}
