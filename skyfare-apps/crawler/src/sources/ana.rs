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

//! # ANA Source
//!
//! The booking widget on `ana.co.jp` talks to `aswbe.ana.co.jp`, which
//! 401s direct calls and sits behind Akamai — so a browser drives the
//! widget and the hook intercepts the booking engine's JSON. The widget
//! is custom React-style components (`be-*` classes), not native inputs:
//! airport pickers open a dialog with a search box, and the calendar
//! opens its own dialog with `aria-label`-addressable day buttons.

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
use crate::sources::normalize::duration_minutes_mod24;
use crate::transport::{BrowserFlow, BrowserSession, FlowStep};

const ENTRY_URL: &str = "https://www.ana.co.jp/en/jp/search/international/flight/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AswbeEnvelope {
    #[serde(default)]
    itineraries: Vec<AswbeItinerary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AswbeItinerary {
    #[serde(default)]
    segments: Vec<AswbeSegment>,
    #[serde(default)]
    fares: Vec<AswbeFare>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AswbeSegment {
    #[serde(default)]
    flight_number: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    departure_date_time: Option<String>,
    #[serde(default)]
    arrival_date_time: Option<String>,
    #[serde(default)]
    aircraft_type: Option<String>,
    #[serde(default)]
    operating_carrier: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AswbeFare {
    #[serde(default)]
    cabin: Option<String>,
    #[serde(default)]
    fare_name: Option<String>,
    #[serde(default)]
    total_amount: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

fn parse_dt(s: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()
        .map(|n| n.and_utc())
}

fn cabin_of(label: &str, fallback: CabinClass) -> CabinClass {
    match label.to_ascii_uppercase().as_str() {
        "Y" | "ECONOMY" => CabinClass::Economy,
        "W" | "PREMIUM_ECONOMY" | "PREMIUM ECONOMY" => CabinClass::PremiumEconomy,
        "C" | "BUSINESS" => CabinClass::Business,
        "F" | "FIRST" => CabinClass::First,
        _ => fallback,
    }
}

pub(crate) fn parse_booking_response(
    body: &str,
    cabin_fallback: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: AswbeEnvelope = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for itin in &parsed.itineraries {
        let (Some(first_seg), Some(last_seg)) = (itin.segments.first(), itin.segments.last())
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
        let flight_number = if flight_number.starts_with("NH") {
            flight_number.to_string()
        } else {
            format!("NH{flight_number}")
        };

        // One price per fare product on the itinerary.
        let prices: Vec<NormalizedPrice> = itin
            .fares
            .iter()
            .filter_map(|fare| {
                let amount = fare.total_amount.filter(|a| *a > 0.0)?;
                let mut price = NormalizedPrice::new(
                    amount,
                    fare.currency.as_deref().unwrap_or("JPY"),
                    DataSource::DirectCrawl,
                    now,
                );
                price.fare_class = fare.fare_name.clone().or_else(|| fare.cabin.clone());
                Some(price)
            })
            .collect();

        let cabin = itin
            .fares
            .first()
            .and_then(|f| f.cabin.as_deref())
            .map(|c| cabin_of(c, cabin_fallback))
            .unwrap_or(cabin_fallback);

        flights.push(NormalizedFlight {
            flight_number,
            airline_code: "NH".to_string(),
            airline_name: Some("All Nippon Airways".to_string()),
            operator: first_seg
                .operating_carrier
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or("NH")
                .to_string(),
            origin: first_seg
                .origin
                .as_deref()
                .unwrap_or_default()
                .to_ascii_uppercase(),
            destination: last_seg
                .destination
                .as_deref()
                .unwrap_or_default()
                .to_ascii_uppercase(),
            departure_time: dep,
            arrival_time: arr,
            duration_minutes: duration_minutes_mod24(dep, arr),
            cabin_class: cabin,
            aircraft_type: first_seg.aircraft_type.clone(),
            stops: (itin.segments.len() as u32).saturating_sub(1),
            prices,
            source: DataSource::DirectCrawl,
            source_tags: vec![],
            crawled_at: now,
        });
    }
    Ok(flights)
}

pub struct AnaCrawler {
    capture_timeout: Duration,
}

impl AnaCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            capture_timeout: Duration::from_secs(settings.l3_timeout.min(75)),
        }
    }

    fn booking_flow(&self, req: &SearchRequest) -> BrowserFlow {
        // Calendar day buttons carry aria-label "YYYY/M/D(DAY)".
        let day_label = format!(
            "{}/{}/{}",
            req.departure_date.format("%Y"),
            req.departure_date.format("%-m"),
            req.departure_date.format("%-d")
        );
        BrowserFlow {
            entry_url: ENTRY_URL.to_string(),
            init_scripts: vec![],
            post_load: vec![
                FlowStep::disable_overlay("#cookie-notice"),
                FlowStep::wait_for(
                    ".be-overseas-reserve-ticket-departure-airport__button",
                    Duration::from_secs(20),
                ),
            ],
            form_fill: vec![
                FlowStep::click(".be-overseas-reserve-ticket-departure-airport__button"),
                FlowStep::type_into(
                    "input.be-list-with-search__searchbox-input",
                    req.origin.clone(),
                ),
                FlowStep::Sleep(Duration::from_millis(700)),
                FlowStep::click("li.be-list__item"),
                FlowStep::click(".be-overseas-reserve-ticket-arrival-airport__button"),
                FlowStep::type_into(
                    "input.be-list-with-search__searchbox-input",
                    req.destination.clone(),
                ),
                FlowStep::Sleep(Duration::from_millis(700)),
                FlowStep::click("li.be-list__item"),
                // The date dialog auto-opens once both airports commit.
                FlowStep::wait_for(
                    "button.be-calendar-month__cell-button",
                    Duration::from_secs(10),
                ),
                FlowStep::click(&format!(
                    "button.be-calendar-month__cell-button[aria-label^='{day_label}']"
                )),
                FlowStep::click("button.be-dialog__button--positive"),
            ],
            trigger: vec![FlowStep::click(
                ".be-overseas-reserve-ticket__search-button",
            )],
            capture_patterns: vec!["aswbe.ana.co.jp".to_string()],
            capture_timeout: self.capture_timeout,
        }
    }
}

#[async_trait]
impl SourceCrawler for AnaCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let session = BrowserSession::launch().await?;
            let captured = session.run_flow(&self.booking_flow(req)).await;
            if let Err(e) = session.close().await {
                tracing::warn!("ana: browser close failed: {e}");
            }

            let bodies = captured?;
            let mut last_err = CrawlError::shape("no parseable captured response");
            for body in &bodies {
                match parse_booking_response(body, req.cabin_class) {
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
        "ana"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(AnaCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_json_parses_with_fare_products() {
        let body = r#"{
            "itineraries": [{
                "segments": [{
                    "flightNumber": "NH862",
                    "origin": "ICN",
                    "destination": "HND",
                    "departureDateTime": "2026-04-01T08:00:00",
                    "arrivalDateTime": "2026-04-01T10:10:00",
                    "aircraftType": "789",
                    "operatingCarrier": "NH"
                }],
                "fares": [
                    {"cabin": "Y", "fareName": "Basic", "totalAmount": 210000.0, "currency": "JPY"},
                    {"cabin": "Y", "fareName": "Flex", "totalAmount": 280000.0, "currency": "JPY"}
                ]
            }]
        }"#;
        let flights = parse_booking_response(body, CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "NH862");
        assert_eq!(f.prices.len(), 2);
        assert_eq!(f.duration_minutes, 130);
        assert_eq!(f.stops, 0);
    }
}
