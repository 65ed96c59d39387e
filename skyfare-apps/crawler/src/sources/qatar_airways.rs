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

//! # Qatar Airways Source
//!
//! Angular SPA backed by `qoreservices.qatarairways.com` behind Akamai; a
//! real browser fills the booking form and the interception hook captures
//! the `/api/offer/search` responses the page fetches. Two envelope
//! variants are attempted in declared order: the offer-search shape, then
//! the flat flight-list shape — a third calendar shape exists upstream but
//! carries no flight identity and is skipped.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    SearchRequest,
};
use crate::sources::normalize::parse_iso8601_minutes;
use crate::transport::{BrowserFlow, BrowserSession, FlowStep};

const BOOKING_URL: &str = "https://www.qatarairways.com/en/booking.html";

fn cabin_of(label: &str, fallback: CabinClass) -> CabinClass {
    match label.to_ascii_uppercase().as_str() {
        "ECONOMY" => CabinClass::Economy,
        "PREMIUM ECONOMY" | "PREMIUM_ECONOMY" => CabinClass::PremiumEconomy,
        "BUSINESS" => CabinClass::Business,
        "FIRST" => CabinClass::First,
        _ => fallback,
    }
}

// Variant 1: offer search envelope.
#[derive(Debug, Deserialize)]
struct OfferEnvelope {
    data: OfferData,
}

#[derive(Debug, Deserialize)]
struct OfferData {
    #[serde(default)]
    offers: Vec<Offer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Offer {
    #[serde(default)]
    total_price: Option<OfferPrice>,
    #[serde(default)]
    journeys: Vec<Journey>,
    #[serde(default)]
    fare_details: Option<FareDetails>,
}

#[derive(Debug, Deserialize)]
struct OfferPrice {
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Journey {
    #[serde(default)]
    segments: Vec<OfferSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferSegment {
    #[serde(default)]
    flight_number: Option<String>,
    #[serde(default)]
    carrier_code: Option<String>,
    #[serde(default)]
    origin: Option<CodeHolder>,
    #[serde(default)]
    destination: Option<CodeHolder>,
    #[serde(default)]
    departure_date_time: Option<String>,
    #[serde(default)]
    arrival_date_time: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    aircraft_code: Option<String>,
    #[serde(default)]
    cabin_class: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodeHolder {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FareDetails {
    #[serde(default)]
    fare_class: Option<String>,
}

// Variant 2: flat flight list.
#[derive(Debug, Deserialize)]
struct FlightListEnvelope {
    flights: Vec<ListedFlight>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedFlight {
    #[serde(default)]
    flight_number: Option<String>,
    #[serde(default)]
    departure: Option<ListedPoint>,
    #[serde(default)]
    arrival: Option<ListedPoint>,
    /// Minutes.
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    fares: Vec<ListedFare>,
}

#[derive(Debug, Deserialize)]
struct ListedPoint {
    #[serde(default)]
    airport: Option<String>,
    #[serde(default)]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedFare {
    #[serde(default)]
    cabin: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

fn parse_dt(s: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

fn parse_offer_envelope(
    body: &str,
    cabin_fallback: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: OfferEnvelope = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for offer in &parsed.data.offers {
        let Some(journey) = offer.journeys.first() else {
            continue;
        };
        let (Some(first_seg), Some(last_seg)) =
            (journey.segments.first(), journey.segments.last())
        else {
            continue;
        };
        let (Some(dep), Some(arr)) = (
            first_seg.departure_date_time.as_deref().and_then(parse_dt),
            last_seg.arrival_date_time.as_deref().and_then(parse_dt),
        ) else {
            continue;
        };
        let Some(flight_number) = first_seg.flight_number.as_deref().filter(|f| !f.is_empty())
        else {
            continue;
        };
        let carrier = first_seg
            .carrier_code
            .as_deref()
            .unwrap_or("QR")
            .to_ascii_uppercase();

        let prices = offer
            .total_price
            .as_ref()
            .and_then(|p| p.amount.filter(|a| *a > 0.0).map(|a| (a, p)))
            .map(|(amount, p)| {
                let mut price = NormalizedPrice::new(
                    amount,
                    p.currency.as_deref().unwrap_or("QAR"),
                    DataSource::DirectCrawl,
                    now,
                );
                price.fare_class = offer
                    .fare_details
                    .as_ref()
                    .and_then(|d| d.fare_class.clone());
                vec![price]
            })
            .unwrap_or_default();

        flights.push(NormalizedFlight {
            flight_number: flight_number.to_string(),
            airline_code: carrier.clone(),
            airline_name: Some("Qatar Airways".to_string()),
            operator: carrier,
            origin: first_seg
                .origin
                .as_ref()
                .and_then(|c| c.code.as_deref())
                .unwrap_or_default()
                .to_ascii_uppercase(),
            destination: last_seg
                .destination
                .as_ref()
                .and_then(|c| c.code.as_deref())
                .unwrap_or_default()
                .to_ascii_uppercase(),
            departure_time: dep,
            arrival_time: arr,
            duration_minutes: first_seg
                .duration
                .as_deref()
                .and_then(parse_iso8601_minutes)
                .unwrap_or_else(|| (arr - dep).num_minutes().max(0)),
            cabin_class: first_seg
                .cabin_class
                .as_deref()
                .map(|c| cabin_of(c, cabin_fallback))
                .unwrap_or(cabin_fallback),
            aircraft_type: first_seg.aircraft_code.clone(),
            stops: (journey.segments.len() as u32).saturating_sub(1),
            prices,
            source: DataSource::DirectCrawl,
            source_tags: vec![],
            crawled_at: now,
        });
    }
    Ok(flights)
}

fn parse_flight_list(
    body: &str,
    request: &SearchRequest,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: FlightListEnvelope = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for flt in &parsed.flights {
        let Some(flight_number) = flt.flight_number.as_deref().filter(|f| !f.is_empty()) else {
            continue;
        };
        let (Some(dep_point), Some(arr_point)) = (flt.departure.as_ref(), flt.arrival.as_ref())
        else {
            continue;
        };
        let (Some(dep_time), Some(arr_time)) = (
            dep_point
                .time
                .as_deref()
                .and_then(crate::sources::normalize::parse_hhmm),
            arr_point
                .time
                .as_deref()
                .and_then(crate::sources::normalize::parse_hhmm),
        ) else {
            continue;
        };
        let dep = request.departure_date.and_time(dep_time).and_utc();
        let mut arr = request.departure_date.and_time(arr_time).and_utc();
        if arr < dep {
            arr += chrono::Duration::days(1);
        }

        let prices = flt
            .fares
            .iter()
            .filter_map(|fare| {
                let amount = fare.price.filter(|p| *p > 0.0)?;
                let mut price = NormalizedPrice::new(
                    amount,
                    fare.currency.as_deref().unwrap_or("QAR"),
                    DataSource::DirectCrawl,
                    now,
                );
                price.fare_class = fare.cabin.clone();
                Some(price)
            })
            .collect();

        flights.push(NormalizedFlight {
            flight_number: flight_number.to_string(),
            airline_code: "QR".to_string(),
            airline_name: Some("Qatar Airways".to_string()),
            operator: "QR".to_string(),
            origin: dep_point
                .airport
                .as_deref()
                .unwrap_or(&request.origin)
                .to_ascii_uppercase(),
            destination: arr_point
                .airport
                .as_deref()
                .unwrap_or(&request.destination)
                .to_ascii_uppercase(),
            departure_time: dep,
            arrival_time: arr,
            duration_minutes: flt
                .duration
                .filter(|d| *d > 0)
                .unwrap_or_else(|| (arr - dep).num_minutes().max(0)),
            cabin_class: request.cabin_class,
            aircraft_type: None,
            stops: 0,
            prices,
            source: DataSource::DirectCrawl,
            source_tags: vec![],
            crawled_at: now,
        });
    }
    Ok(flights)
}

/// Attempt the declared envelope variants in order.
pub(crate) fn parse_captured(
    body: &str,
    request: &SearchRequest,
) -> FetchResult<Vec<NormalizedFlight>> {
    match parse_offer_envelope(body, request.cabin_class) {
        Ok(flights) if !flights.is_empty() => return Ok(flights),
        Ok(_) => {}
        Err(first_err) => {
            return match parse_flight_list(body, request) {
                Ok(flights) if !flights.is_empty() => Ok(flights),
                _ => Err(first_err),
            };
        }
    }
    parse_flight_list(body, request)
}

pub struct QatarAirwaysCrawler {
    capture_timeout: Duration,
}

impl QatarAirwaysCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            capture_timeout: Duration::from_secs(settings.l3_timeout.min(60)),
        }
    }

    fn booking_flow(&self, req: &SearchRequest) -> BrowserFlow {
        BrowserFlow {
            entry_url: BOOKING_URL.to_string(),
            init_scripts: vec![],
            post_load: vec![
                FlowStep::disable_overlay("#onetrust-consent-sdk"),
                FlowStep::wait_for("input[aria-label='From']", Duration::from_secs(15)),
            ],
            form_fill: vec![
                FlowStep::click("input[aria-label='From']"),
                FlowStep::type_into("input[aria-label='From']", req.origin.clone()),
                FlowStep::Sleep(Duration::from_millis(900)),
                FlowStep::press_enter("input[aria-label='From']"),
                FlowStep::click("input[aria-label='To']"),
                FlowStep::type_into("input[aria-label='To']", req.destination.clone()),
                FlowStep::Sleep(Duration::from_millis(900)),
                FlowStep::press_enter("input[aria-label='To']"),
                // Date picker auto-opens after the destination commits.
                FlowStep::wait_for("[role='grid']", Duration::from_secs(10)),
                FlowStep::click(&format!(
                    "[aria-label*='{}']",
                    req.departure_date.format("%-d %B %Y")
                )),
            ],
            trigger: vec![FlowStep::click("button[type='submit']")],
            capture_patterns: vec!["qoreservices.qatarairways.com".to_string()],
            capture_timeout: self.capture_timeout,
        }
    }
}

#[async_trait]
impl SourceCrawler for QatarAirwaysCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let session = BrowserSession::launch().await?;
            let captured = session.run_flow(&self.booking_flow(req)).await;
            if let Err(e) = session.close().await {
                tracing::warn!("qatar_airways: browser close failed: {e}");
            }

            let bodies = captured?;
            let mut last_err = CrawlError::shape("no parseable captured response");
            for body in &bodies {
                match parse_captured(body, req) {
                    Ok(flights) if !flights.is_empty() => return Ok(flights),
                    Ok(_) => {}
                    Err(e) => last_err = e,
                }
            }
            Err(last_err)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        match BrowserSession::launch().await {
            Ok(session) => {
                let ok = session.page_source().await.is_ok();
                let _ = session.close().await;
                ok
            }
            Err(_) => false,
        }
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "qatar_airways"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(QatarAirwaysCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn request() -> SearchRequest {
        SearchRequest::builder(
            "ICN",
            "DOH",
            NaiveDate::from_ymd_opt(2026, 4, 15).unwrap(),
        )
        .build()
        .unwrap()
    }

    #[test]
    fn offer_envelope_variant_parses() {
        let body = r#"{
            "data": {"offers": [{
                "offerId": "OF-1",
                "totalPrice": {"amount": 850000, "currency": "KRW"},
                "journeys": [{"segments": [{
                    "flightNumber": "QR859",
                    "carrierCode": "QR",
                    "origin": {"code": "ICN"},
                    "destination": {"code": "DOH"},
                    "departureDateTime": "2026-04-15T01:10:00",
                    "arrivalDateTime": "2026-04-15T06:30:00",
                    "duration": "PT10H20M",
                    "aircraftCode": "77W",
                    "cabinClass": "ECONOMY"
                }]}],
                "fareDetails": {"fareType": "PUBLISHED", "fareClass": "Y"}
            }]}
        }"#;
        let flights = parse_captured(body, &request()).unwrap();
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].flight_number, "QR859");
        assert_eq!(flights[0].duration_minutes, 620);
        assert_eq!(flights[0].prices[0].fare_class.as_deref(), Some("Y"));
    }

    #[test]
    fn flight_list_variant_is_second_in_order() {
        let body = r#"{
            "flights": [{
                "flightNumber": "QR859",
                "departure": {"airport": "ICN", "time": "01:10"},
                "arrival": {"airport": "DOH", "time": "06:30"},
                "duration": 620,
                "fares": [{"cabin": "Economy", "price": 850000, "currency": "KRW"}]
            }]
        }"#;
        let flights = parse_captured(body, &request()).unwrap();
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].prices[0].amount, 850000.0);
    }

    #[test]
    fn unknown_shape_is_a_typed_error() {
        assert!(parse_captured(r#"{"something": []}"#, &request()).is_err());
    }
}
