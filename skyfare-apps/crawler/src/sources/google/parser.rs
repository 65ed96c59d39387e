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

//! # Google Flights Results Parser
//!
//! Side-effect free HTML parsing of the search results page. Flight
//! identity (airline, number, legs) comes from the travel-impact-model URL
//! each card carries; display fields come from the obfuscated class names,
//! which churn with Google's frontend releases and live in one selector
//! struct for that reason.

use chrono::{Duration, NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::{CrawlError, FetchResult};
use crate::schemas::{DataSource, NormalizedFlight, NormalizedPrice, SearchRequest};
use crate::sources::normalize::{duration_minutes_mod24, local_to_utc};

#[derive(Clone)]
struct FlightSelectors {
    containers: Selector,
    flight_card: Selector,
    airline: Selector,
    times: Selector,
    duration: Selector,
    stops: Selector,
    arrives_next_day: Selector,
    price: Selector,
    flight_info: Selector,
}

impl FlightSelectors {
    fn new() -> Self {
        Self {
            containers: Selector::parse(r#"div[jsname="IWWDBc"], div[jsname="YdtKid"]"#).unwrap(),
            flight_card: Selector::parse(r#"ul.Rk10dc li"#).unwrap(),
            airline: Selector::parse(r#"div.sSHqwe.tPgKwe.ogfYpf span"#).unwrap(),
            times: Selector::parse(r#"span.mv1WYe div"#).unwrap(),
            duration: Selector::parse(r#"li div.Ak5kof div"#).unwrap(),
            stops: Selector::parse(r#".BbR8Ec .ogfYpf"#).unwrap(),
            arrives_next_day: Selector::parse(r#"span.bOzv6"#).unwrap(),
            price: Selector::parse(r#".YMlIz.FpEdX"#).unwrap(),
            flight_info: Selector::parse(r#".NZRfve"#).unwrap(),
        }
    }
}

static DURATION_H_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*hr").unwrap());
static DURATION_M_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*min").unwrap());
static ITINERARY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"itinerary=([^&]+)").unwrap());

/// One leg from the travel-impact-model itinerary string:
/// `ORIGIN-DEST-AIRLINE-NUMBER-YYYYMMDD`.
#[derive(Debug, Clone)]
struct ItineraryLeg {
    origin: String,
    destination: String,
    airline_code: String,
    flight_number: String,
    date: Option<NaiveDate>,
}

fn parse_itinerary_url(url: &str) -> Vec<ItineraryLeg> {
    let Some(caps) = ITINERARY_RE.captures(url) else {
        return Vec::new();
    };
    caps[1]
        .split(',')
        .filter_map(|leg| {
            let parts: Vec<&str> = leg.split('-').collect();
            if parts.len() < 4 {
                return None;
            }
            Some(ItineraryLeg {
                origin: parts[0].to_ascii_uppercase(),
                destination: parts[1].to_ascii_uppercase(),
                airline_code: parts[2].to_ascii_uppercase(),
                flight_number: format!("{}{}", parts[2].to_ascii_uppercase(), parts[3]),
                date: parts
                    .get(4)
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok()),
            })
        })
        .collect()
}

fn parse_clock(text: &str) -> Option<NaiveTime> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ':' || *c == ' ')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    NaiveTime::parse_from_str(&cleaned, "%I:%M %p")
        .or_else(|_| NaiveTime::parse_from_str(&cleaned, "%H:%M"))
        .ok()
}

fn parse_duration_text(text: &str) -> Option<i64> {
    let hours: i64 = DURATION_H_RE
        .captures(text)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let minutes: i64 = DURATION_M_RE
        .captures(text)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    if hours == 0 && minutes == 0 {
        None
    } else {
        Some(hours * 60 + minutes)
    }
}

fn clean_price(text: &str) -> Option<f64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<f64>().ok().filter(|p| *p > 0.0)
}

/// Parse the results page into normalized flights. Multi-leg itineraries
/// collapse to one flight keyed by the first leg, recording the stop count.
pub fn parse_flights_html(
    html: &str,
    request: &SearchRequest,
) -> FetchResult<Vec<NormalizedFlight>> {
    let selectors = FlightSelectors::new();
    let document = Html::parse_document(html);
    let now = chrono::Utc::now();

    let mut flights = Vec::new();

    for container in document.select(&selectors.containers) {
        for card in container.select(&selectors.flight_card) {
            if let Some(flight) = parse_card(card, &selectors, request, now) {
                flights.push(flight);
            }
        }
    }

    if flights.is_empty() {
        return Err(CrawlError::shape("no flight cards parsed from results page"));
    }
    Ok(flights)
}

fn parse_card(
    card: ElementRef,
    selectors: &FlightSelectors,
    request: &SearchRequest,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<NormalizedFlight> {
    let legs = card
        .select(&selectors.flight_info)
        .next()
        .and_then(|el| el.value().attr("data-travelimpactmodelwebsiteurl"))
        .map(parse_itinerary_url)
        .unwrap_or_default();
    let first_leg = legs.first()?;
    let last_leg = legs.last()?;

    let airline_name = card
        .select(&selectors.airline)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty());

    let times: Vec<NaiveTime> = card
        .select(&selectors.times)
        .filter_map(|el| parse_clock(&el.text().collect::<String>()))
        .collect();
    if times.len() < 2 {
        tracing::warn!("Google card for {} missing times", first_leg.flight_number);
        return None;
    }

    let plus_days: i64 = card
        .select(&selectors.arrives_next_day)
        .next()
        .map(|el| el.text().collect::<String>())
        .and_then(|t| t.trim().trim_start_matches('+').parse().ok())
        .unwrap_or(0);

    let date = first_leg.date.unwrap_or(request.departure_date);
    // Google renders local airport wall-clock times; keep them as the
    // neutral UTC marker.
    let departure_time = local_to_utc(date.and_time(times[0]), 0);
    let arrival_time = local_to_utc(date.and_time(times[1]), 0) + Duration::days(plus_days);

    let duration_minutes = card
        .select(&selectors.duration)
        .next()
        .and_then(|el| parse_duration_text(&el.text().collect::<String>()))
        .unwrap_or_else(|| duration_minutes_mod24(departure_time, arrival_time));

    let stops = card
        .select(&selectors.stops)
        .next()
        .map(|el| el.text().collect::<String>())
        .map(|label| {
            if label.contains("Nonstop") {
                0
            } else {
                label
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or((legs.len() as u32).saturating_sub(1))
            }
        })
        .unwrap_or((legs.len() as u32).saturating_sub(1));

    let prices = card
        .select(&selectors.price)
        .next()
        .and_then(|el| clean_price(&el.text().collect::<String>()))
        .map(|amount| {
            vec![NormalizedPrice::new(
                amount,
                request.currency.clone(),
                DataSource::GoogleProtobuf,
                now,
            )]
        })
        .unwrap_or_default();

    Some(NormalizedFlight {
        flight_number: first_leg.flight_number.clone(),
        airline_code: first_leg.airline_code.clone(),
        airline_name,
        operator: first_leg.airline_code.clone(),
        origin: first_leg.origin.clone(),
        destination: last_leg.destination.clone(),
        departure_time,
        arrival_time,
        duration_minutes,
        cabin_class: request.cabin_class,
        aircraft_type: None,
        stops,
        prices,
        source: DataSource::GoogleProtobuf,
        source_tags: vec![],
        crawled_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn itinerary_urls_decode_legs() {
        let legs = parse_itinerary_url(
            "https://www.travelimpactmodel.org/lookup/flight?itinerary=ICN-NRT-KE-703-20260401",
        );
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].flight_number, "KE703");
        assert_eq!(legs[0].origin, "ICN");
        assert_eq!(legs[0].destination, "NRT");
        assert_eq!(legs[0].date, NaiveDate::from_ymd_opt(2026, 4, 1));
    }

    #[test]
    fn multi_leg_itineraries_keep_endpoints() {
        let legs = parse_itinerary_url(
            "https://x/flight?itinerary=LAX-ATL-F9-4316-20250815,ATL-JFK-F9-4818-20250815",
        );
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].origin, "LAX");
        assert_eq!(legs[1].destination, "JFK");
    }

    #[test]
    fn clock_formats() {
        assert_eq!(parse_clock("8:05 AM"), NaiveTime::from_hms_opt(8, 5, 0));
        assert_eq!(parse_clock("11:45 PM"), NaiveTime::from_hms_opt(23, 45, 0));
        assert_eq!(parse_clock("14:20"), NaiveTime::from_hms_opt(14, 20, 0));
        assert_eq!(parse_clock("garbage"), None);
    }

    #[test]
    fn duration_text_to_minutes() {
        assert_eq!(parse_duration_text("7 hr 25 min"), Some(445));
        assert_eq!(parse_duration_text("55 min"), Some(55));
        assert_eq!(parse_duration_text("2 hr"), Some(120));
        assert_eq!(parse_duration_text("soon"), None);
    }

    #[test]
    fn price_text_to_amount() {
        assert_eq!(clean_price("₩1,234,567"), Some(1_234_567.0));
        assert_eq!(clean_price("$224"), Some(224.0));
        assert_eq!(clean_price("—"), None);
    }
}
