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

//! # Philippine Airlines Source
//!
//! Public flight status API at `/pal/flights/v1/status` — schedule only,
//! no fares (the booking API behind Imperva needs a browser-minted
//! `X-D-Token`, out of reach for L2). Flights come back priceless with
//! real departure/arrival times and codeshare info; the window is roughly
//! 14 days out.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight};
use crate::sources::normalize::duration_minutes_mod24;
use crate::transport::DirectClient;

const BASE_URL: &str = "https://www.philippineairlines.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    flights: Vec<StatusFlight>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusFlight {
    #[serde(default)]
    flight_number: Option<String>,
    #[serde(default)]
    operating_airline_code: Option<String>,
    #[serde(default)]
    legs: Vec<StatusLeg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusLeg {
    #[serde(default)]
    departure_airport: Option<String>,
    #[serde(default)]
    arrival_airport: Option<String>,
    #[serde(default)]
    scheduled_departure_time: Option<String>,
    #[serde(default)]
    scheduled_arrival_time: Option<String>,
    #[serde(default)]
    aircraft_type: Option<String>,
}

fn parse_local(s: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()
        .map(|n| n.and_utc())
}

pub(crate) fn parse_status(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: StatusResponse = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for flt in &parsed.flights {
        let (Some(first_leg), Some(last_leg)) = (flt.legs.first(), flt.legs.last()) else {
            continue;
        };
        let leg_origin = first_leg
            .departure_airport
            .as_deref()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let leg_dest = last_leg
            .arrival_airport
            .as_deref()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if leg_origin != origin || leg_dest != destination {
            continue;
        }
        let (Some(dep), Some(arr)) = (
            first_leg
                .scheduled_departure_time
                .as_deref()
                .and_then(parse_local),
            last_leg
                .scheduled_arrival_time
                .as_deref()
                .and_then(parse_local),
        ) else {
            continue;
        };
        let Some(number) = flt.flight_number.as_deref().filter(|f| !f.is_empty()) else {
            continue;
        };
        let flight_number = if number.starts_with("PR") {
            number.to_string()
        } else {
            format!("PR{number}")
        };

        flights.push(NormalizedFlight {
            flight_number,
            airline_code: "PR".to_string(),
            airline_name: Some("Philippine Airlines".to_string()),
            operator: flt
                .operating_airline_code
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or("PR")
                .to_string(),
            origin: leg_origin,
            destination: leg_dest,
            departure_time: dep,
            arrival_time: arr,
            duration_minutes: duration_minutes_mod24(dep, arr),
            cabin_class,
            aircraft_type: first_leg.aircraft_type.clone(),
            stops: (flt.legs.len() as u32).saturating_sub(1),
            prices: Vec::new(),
            source: DataSource::DirectCrawl,
            source_tags: vec![],
            crawled_at: now,
        });
    }
    Ok(flights)
}

pub struct PhilippineAirlinesCrawler {
    client: DirectClient,
    retry: RetryPolicy,
}

impl PhilippineAirlinesCrawler {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            client: DirectClient::new(settings.l1_timeout)?,
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        })
    }

    async fn flight_status(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
    ) -> FetchResult<String> {
        let url = format!("{BASE_URL}/pal/flights/v1/status");
        let body = json!({
            "departureAirport": origin,
            "arrivalAirport": destination,
            "flightDate": date,
        });
        self.retry
            .run(
                || {
                    self.client.post_json(
                        &url,
                        &[("Accept", "application/json")],
                        &body,
                    )
                },
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for PhilippineAirlinesCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let date = req.departure_date.format("%Y-%m-%d").to_string();
            let body = self.flight_status(&req.origin, &req.destination, &date).await?;
            parse_status(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        let date = (Utc::now().date_naive() + chrono::Duration::days(2))
            .format("%Y-%m-%d")
            .to_string();
        self.flight_status("MNL", "CEB", &date).await.is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "philippine_airlines"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(PhilippineAirlinesCrawler::new(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_flights_are_schedule_only() {
        let body = r#"{
            "flights": [{
                "flightNumber": "PR467",
                "operatingAirlineCode": "PR",
                "legs": [{
                    "departureAirport": "MNL",
                    "arrivalAirport": "ICN",
                    "scheduledDepartureTime": "2026-03-15T07:40:00",
                    "scheduledArrivalTime": "2026-03-15T12:55:00",
                    "aircraftType": "A321"
                }]
            }]
        }"#;
        let flights = parse_status(body, "MNL", "ICN", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "PR467");
        assert!(f.prices.is_empty());
        assert_eq!(f.duration_minutes, 315);
        assert_eq!(f.aircraft_type.as_deref(), Some("A321"));
    }
}
