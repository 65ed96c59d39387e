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

//! # Singapore Airlines Source
//!
//! NDC-style Flight Availability API on `developer.singaporeair.com`,
//! authenticated with a static `apikey` header and a fresh UUID request id
//! per call. Each recommendation carries segment bounds with nested legs
//! plus fare-family pricing; one flight per segment, one price per fare
//! recommendation covering it.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    SearchRequest,
};
use crate::transport::DirectClient;

const BASE_URL: &str = "https://developer.singaporeair.com";

fn cabin_code(cabin: CabinClass) -> &'static str {
    match cabin {
        CabinClass::Economy => "Y",
        CabinClass::PremiumEconomy => "S",
        CabinClass::Business => "J",
        CabinClass::First => "F",
    }
}

fn cabin_from_code(code: &str, fallback: CabinClass) -> CabinClass {
    match code.to_ascii_uppercase().as_str() {
        "Y" | "M" => CabinClass::Economy,
        "W" | "S" => CabinClass::PremiumEconomy,
        "J" | "C" => CabinClass::Business,
        "F" | "R" => CabinClass::First,
        _ => fallback,
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityEnvelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    response: Option<AvailabilityResponse>,
}

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    currency: Option<CurrencyInfo>,
    #[serde(default)]
    recommendations: Vec<Recommendation>,
}

#[derive(Debug, Deserialize)]
struct CurrencyInfo {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recommendation {
    #[serde(default)]
    segment_bounds: Vec<SegmentBound>,
    #[serde(default)]
    fare_family: Option<String>,
    #[serde(default)]
    cabin_class: Option<String>,
    #[serde(default)]
    fare_summary: Option<FareSummary>,
}

#[derive(Debug, Deserialize)]
struct SegmentBound {
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Segment {
    #[serde(default)]
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Leg {
    #[serde(default)]
    flight_number: Option<String>,
    #[serde(default)]
    departure_date_time: Option<String>,
    #[serde(default)]
    arrival_date_time: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    operating_airline: Option<String>,
    #[serde(default)]
    marketing_airline: Option<String>,
    #[serde(default)]
    aircraft: Option<String>,
    /// Seconds.
    #[serde(default)]
    flight_duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FareSummary {
    #[serde(default)]
    fare_total: Option<FareTotal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FareTotal {
    #[serde(default)]
    total_amount: Option<f64>,
}

/// SQ returns local times without timezone info; kept as the neutral UTC
/// marker like every other schedule-local source.
fn parse_sq_datetime(s: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|n| n.and_utc())
}

pub(crate) fn parse_flight_availability(
    body: &str,
    cabin_fallback: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: AvailabilityEnvelope = serde_json::from_str(body)?;
    if let Some(status) = parsed.status.as_deref() {
        if !status.eq_ignore_ascii_case("SUCCESS") {
            return Err(CrawlError::UpstreamAdvisory(format!(
                "SQ availability status {status}"
            )));
        }
    }
    let Some(response) = parsed.response else {
        return Ok(Vec::new());
    };
    let currency = response
        .currency
        .as_ref()
        .and_then(|c| c.code.as_deref())
        .unwrap_or("SGD")
        .to_string();

    let now = Utc::now();
    // Identical legs recur across fare-family recommendations; fold each
    // recommendation's price into the one flight per leg set.
    let mut flights: Vec<NormalizedFlight> = Vec::new();

    for rec in &response.recommendations {
        let cabin = rec
            .cabin_class
            .as_deref()
            .map(|c| cabin_from_code(c, cabin_fallback))
            .unwrap_or(cabin_fallback);
        let amount = rec
            .fare_summary
            .as_ref()
            .and_then(|s| s.fare_total.as_ref())
            .and_then(|t| t.total_amount)
            .filter(|a| *a > 0.0);

        for bound in &rec.segment_bounds {
            for segment in &bound.segments {
                let (Some(first_leg), Some(last_leg)) =
                    (segment.legs.first(), segment.legs.last())
                else {
                    continue;
                };
                let (Some(dep_str), Some(arr_str)) = (
                    first_leg.departure_date_time.as_deref(),
                    last_leg.arrival_date_time.as_deref(),
                ) else {
                    continue;
                };
                let (Some(dep), Some(arr)) =
                    (parse_sq_datetime(dep_str), parse_sq_datetime(arr_str))
                else {
                    continue;
                };
                let Some(flight_number) = first_leg.flight_number.as_deref() else {
                    continue;
                };
                let marketing = first_leg
                    .marketing_airline
                    .as_deref()
                    .unwrap_or("SQ")
                    .to_ascii_uppercase();
                let flight_number = if flight_number.starts_with(&marketing) {
                    flight_number.to_string()
                } else {
                    format!("{marketing}{flight_number}")
                };

                let duration_minutes = segment
                    .legs
                    .iter()
                    .filter_map(|l| l.flight_duration)
                    .sum::<i64>()
                    / 60;
                let duration_minutes = if duration_minutes > 0 {
                    duration_minutes
                } else {
                    (arr - dep).num_minutes().max(0)
                };

                let price = amount.map(|a| {
                    let mut p = NormalizedPrice::new(a, currency.clone(), DataSource::OfficialApi, now);
                    p.fare_class = rec.fare_family.clone();
                    p
                });

                let key = (flight_number.clone(), dep);
                if let Some(existing) = flights
                    .iter_mut()
                    .find(|f| (f.flight_number.clone(), f.departure_time) == key)
                {
                    if let Some(p) = price {
                        existing.prices.push(p);
                    }
                    continue;
                }

                flights.push(NormalizedFlight {
                    flight_number,
                    airline_code: marketing.clone(),
                    airline_name: Some("Singapore Airlines".to_string()),
                    operator: first_leg
                        .operating_airline
                        .clone()
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| marketing.clone()),
                    origin: first_leg
                        .origin
                        .as_deref()
                        .unwrap_or_default()
                        .to_ascii_uppercase(),
                    destination: last_leg
                        .destination
                        .as_deref()
                        .unwrap_or_default()
                        .to_ascii_uppercase(),
                    departure_time: dep,
                    arrival_time: arr,
                    duration_minutes,
                    cabin_class: cabin,
                    aircraft_type: first_leg.aircraft.clone(),
                    stops: (segment.legs.len() as u32).saturating_sub(1),
                    prices: price.into_iter().collect(),
                    source: DataSource::OfficialApi,
                    source_tags: vec![],
                    crawled_at: now,
                });
            }
        }
    }
    Ok(flights)
}

pub struct SingaporeAirlinesCrawler {
    client: DirectClient,
    api_key: String,
    retry: RetryPolicy,
}

impl SingaporeAirlinesCrawler {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        if settings.singapore_api_key.is_empty() {
            anyhow::bail!("CRAWLER_SINGAPORE_API_KEY must be set");
        }
        Ok(Self {
            client: DirectClient::new(settings.l1_timeout)?,
            api_key: settings.singapore_api_key.clone(),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        })
    }

    async fn availability(&self, req: &SearchRequest) -> FetchResult<String> {
        let url = format!("{BASE_URL}/flightavailability/get");
        let request_id = Uuid::new_v4().to_string();
        let body = json!({
            "clientUUID": request_id,
            "request": {
                "itineraryDetails": [{
                    "originAirportCode": req.origin,
                    "destinationAirportCode": req.destination,
                    "departureDate": req.departure_date.format("%Y-%m-%d").to_string(),
                }],
                "cabinClass": cabin_code(req.cabin_class),
                "adultCount": req.passengers.adults,
                "childCount": req.passengers.children,
                "infantCount": req.passengers.infants(),
            }
        });
        let headers = [
            ("apikey", self.api_key.as_str()),
            ("Accept", "application/json"),
        ];
        self.client.post_json(&url, &headers, &body).await
    }
}

#[async_trait]
impl SourceCrawler for SingaporeAirlinesCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self
                .retry
                .run(|| self.availability(req), CrawlError::is_retryable)
                .await?;
            parse_flight_availability(&body, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        let Ok(req) = crate::schemas::SearchRequest::builder(
            "ICN",
            "SIN",
            chrono::Utc::now().date_naive() + chrono::Duration::days(2),
        )
        .build() else {
            return false;
        };
        match self.availability(&req).await {
            Ok(body) => serde_json::from_str::<AvailabilityEnvelope>(&body).is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::OfficialApi
    }

    fn name(&self) -> &'static str {
        "singapore_airlines"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(SingaporeAirlinesCrawler::new(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "status": "SUCCESS",
        "response": {
            "currency": {"code": "KRW"},
            "recommendations": [
                {
                    "segmentBounds": [{
                        "segments": [{
                            "legs": [{
                                "flightNumber": "SQ615",
                                "departureDateTime": "2026-03-15 08:00:00",
                                "arrivalDateTime": "2026-03-15 14:22:00",
                                "origin": "icn",
                                "destination": "sin",
                                "operatingAirline": "SQ",
                                "marketingAirline": "SQ",
                                "aircraft": "359",
                                "flightDuration": 22920
                            }]
                        }]
                    }],
                    "fareFamily": "ECOVALUE",
                    "cabinClass": "Y",
                    "fareSummary": {"fareTotal": {"totalAmount": 812000.0}}
                },
                {
                    "segmentBounds": [{
                        "segments": [{
                            "legs": [{
                                "flightNumber": "SQ615",
                                "departureDateTime": "2026-03-15 08:00:00",
                                "arrivalDateTime": "2026-03-15 14:22:00",
                                "origin": "ICN",
                                "destination": "SIN",
                                "operatingAirline": "SQ",
                                "marketingAirline": "SQ",
                                "flightDuration": 22920
                            }]
                        }]
                    }],
                    "fareFamily": "ECOFLEXI",
                    "cabinClass": "Y",
                    "fareSummary": {"fareTotal": {"totalAmount": 995000.0}}
                }
            ]
        }
    }"#;

    #[test]
    fn fare_families_fold_into_one_flight() {
        let flights = parse_flight_availability(SAMPLE, CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "SQ615");
        assert_eq!(f.origin, "ICN");
        assert_eq!(f.duration_minutes, 382);
        assert_eq!(f.prices.len(), 2);
        assert_eq!(f.prices[0].fare_class.as_deref(), Some("ECOVALUE"));
        assert_eq!(f.prices[1].amount, 995000.0);
    }

    #[test]
    fn upstream_failure_status_is_advisory() {
        let body = r#"{"status": "FAILURE"}"#;
        assert!(matches!(
            parse_flight_availability(body, CabinClass::Economy).unwrap_err(),
            CrawlError::UpstreamAdvisory(_)
        ));
    }
}
