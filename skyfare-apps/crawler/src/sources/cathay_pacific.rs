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

//! # Cathay Pacific Source
//!
//! `api.cathaypacific.com` endpoints behind Akamai; a website warm-up on
//! the same Chrome-fingerprinted client earns the session cookies the API
//! checks. Two calls per crawl: the flight timetable (schedule + segment
//! detail) and the fare histogram (daily lowest prices), joined on the
//! departure date.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use skyfare_query_queues::RetryPolicy;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
};
use crate::sources::normalize::{parse_hhmm, parse_iso8601_minutes};
use crate::transport::ImpersonateClient;

const API_BASE: &str = "https://api.cathaypacific.com";
const BOOK_BASE: &str = "https://book.cathaypacific.com";
const WEBSITE: &str = "https://www.cathaypacific.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimetableResponse {
    #[serde(default)]
    flight_schedule_list: Vec<ScheduleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleEntry {
    #[serde(default)]
    flight_number: Option<String>,
    #[serde(default)]
    departure_date: Option<String>,
    #[serde(default)]
    departure_time: Option<String>,
    #[serde(default)]
    arrival_date: Option<String>,
    #[serde(default)]
    arrival_time: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    aircraft_type: Option<String>,
    #[serde(default)]
    operating_carrier: Option<String>,
    #[serde(default)]
    stops: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct HistogramResponse {
    #[serde(default)]
    dates: Vec<HistogramDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistogramDate {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    lowest_price: Option<HistogramPrice>,
}

#[derive(Debug, Deserialize)]
struct HistogramPrice {
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

fn parse_histogram(body: &str) -> FetchResult<HashMap<NaiveDate, (f64, String)>> {
    let parsed: HistogramResponse = serde_json::from_str(body)?;
    let mut map = HashMap::new();
    for entry in &parsed.dates {
        let (Some(date), Some(price)) = (
            entry
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            entry.lowest_price.as_ref(),
        ) else {
            continue;
        };
        let Some(amount) = price.amount.filter(|a| *a > 0.0) else {
            continue;
        };
        map.insert(
            date,
            (amount, price.currency.clone().unwrap_or_else(|| "HKD".to_string())),
        );
    }
    Ok(map)
}

pub(crate) fn parse_timetable_with_fares(
    timetable_body: &str,
    histogram_body: Option<&str>,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: TimetableResponse = serde_json::from_str(timetable_body)?;
    let day_prices = match histogram_body {
        Some(body) => parse_histogram(body).unwrap_or_default(),
        None => HashMap::new(),
    };
    let now = Utc::now();
    let mut flights = Vec::new();

    for entry in &parsed.flight_schedule_list {
        let Some(flight_number) = entry.flight_number.as_deref().filter(|f| !f.is_empty())
        else {
            continue;
        };
        let (Some(dep_date), Some(dep_time)) = (
            entry
                .departure_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            entry.departure_time.as_deref().and_then(parse_hhmm),
        ) else {
            continue;
        };
        let arr_date = entry
            .arrival_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .unwrap_or(dep_date);
        let Some(arr_time) = entry.arrival_time.as_deref().and_then(parse_hhmm) else {
            continue;
        };

        // Local airport wall-clock times, neutral-UTC tagged.
        let departure_time = dep_date.and_time(dep_time).and_utc();
        let arrival_time = arr_date.and_time(arr_time).and_utc();

        let duration_minutes = entry
            .duration
            .as_deref()
            .and_then(parse_iso8601_minutes)
            .unwrap_or_else(|| (arrival_time - departure_time).num_minutes().max(0));

        let prices = day_prices
            .get(&dep_date)
            .map(|(amount, currency)| {
                let mut p =
                    NormalizedPrice::new(*amount, currency.clone(), DataSource::DirectCrawl, now);
                p.fare_class = Some("lowest".to_string());
                vec![p]
            })
            .unwrap_or_default();

        flights.push(NormalizedFlight {
            flight_number: flight_number.to_string(),
            airline_code: "CX".to_string(),
            airline_name: Some("Cathay Pacific".to_string()),
            operator: entry
                .operating_carrier
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or("CX")
                .to_string(),
            origin: entry
                .origin
                .as_deref()
                .unwrap_or_default()
                .to_ascii_uppercase(),
            destination: entry
                .destination
                .as_deref()
                .unwrap_or_default()
                .to_ascii_uppercase(),
            departure_time,
            arrival_time,
            duration_minutes,
            cabin_class,
            aircraft_type: entry.aircraft_type.clone(),
            stops: entry.stops.unwrap_or(0),
            prices,
            source: DataSource::DirectCrawl,
            source_tags: vec![],
            crawled_at: now,
        });
    }
    Ok(flights)
}

pub struct CathayPacificCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl CathayPacificCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    async fn flight_timetable(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
        cabin: CabinClass,
        adults: u8,
    ) -> FetchResult<String> {
        let url = format!("{API_BASE}/flightinformation/flightschedule/v2/flightTimetable");
        let query = [
            ("origin", origin.to_string()),
            ("destination", destination.to_string()),
            ("departureDate", date.to_string()),
            ("tripType", "O".to_string()),
            ("cabin", cabin.booking_code().to_string()),
            ("adults", adults.to_string()),
            ("lang", "en_US".to_string()),
        ];
        self.http
            .get_with_query(
                &url,
                &[("Accept", "application/json"), ("Referer", WEBSITE)],
                &query,
                &[WEBSITE],
            )
            .await
    }

    async fn fare_histogram(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
    ) -> FetchResult<String> {
        let url = format!("{BOOK_BASE}/CathayPacificV3/dyn/air/api/instant/histogram");
        let body = json!({
            "origin": origin,
            "destination": destination,
            "departureDate": date,
            "tripType": "O",
        });
        self.http
            .post_json(
                &url,
                &[("Accept", "application/json"), ("Referer", WEBSITE)],
                &body,
                &[WEBSITE],
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for CathayPacificCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let date = req.departure_date.format("%Y-%m-%d").to_string();
            let timetable = self
                .retry
                .run(
                    || {
                        self.flight_timetable(
                            &req.origin,
                            &req.destination,
                            &date,
                            req.cabin_class,
                            req.passengers.adults,
                        )
                    },
                    CrawlError::is_retryable,
                )
                .await?;
            let histogram = self
                .fare_histogram(&req.origin, &req.destination, &date)
                .await
                .ok();
            parse_timetable_with_fares(&timetable, histogram.as_deref(), req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        // The destinations list is unauthenticated.
        self.http
            .get(&format!("{API_BASE}/ibe-od/v2.0/en_US"), &[], &[])
            .await
            .is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "cathay_pacific"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(CathayPacificCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMETABLE: &str = r#"{
        "flightScheduleList": [{
            "flightNumber": "CX411",
            "departureDate": "2026-03-15",
            "departureTime": "09:00",
            "arrivalDate": "2026-03-15",
            "arrivalTime": "12:05",
            "origin": "ICN",
            "destination": "HKG",
            "duration": "PT3H55M",
            "aircraftType": "A350-900",
            "operatingCarrier": "CX",
            "stops": 0
        }]
    }"#;

    const HISTOGRAM: &str = r#"{
        "dates": [{"date": "2026-03-15", "lowestPrice": {"amount": 2150.0, "currency": "HKD"}}]
    }"#;

    #[test]
    fn timetable_joins_histogram_fares() {
        let flights =
            parse_timetable_with_fares(TIMETABLE, Some(HISTOGRAM), CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "CX411");
        assert_eq!(f.duration_minutes, 235);
        assert_eq!(f.prices.len(), 1);
        assert_eq!(f.prices[0].amount, 2150.0);
        assert_eq!(f.prices[0].currency, "HKD");
    }

    #[test]
    fn schedule_survives_missing_histogram() {
        let flights =
            parse_timetable_with_fares(TIMETABLE, None, CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        assert!(flights[0].prices.is_empty());
    }
}
