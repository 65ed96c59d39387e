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

//! # Air Premia Source
//!
//! Fare endpoints on `airpremia.com` sit behind a Cloudflare JS challenge
//! that hard-blocks mismatched TLS fingerprints. A fresh Chrome-emulated
//! client with a homepage warm-up collects the `cf_clearance` cookie on
//! the same fingerprint that uses it. Per-day, per-cabin lowest fares;
//! `PF` (Premia First) maps to Business.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    synthetic_flight_number,
};
use crate::transport::ImpersonateClient;

const BASE_URL: &str = "https://www.airpremia.com";

fn cabin_of_product(product_class_type: &str) -> CabinClass {
    match product_class_type {
        "PE" => CabinClass::PremiumEconomy,
        "PF" => CabinClass::Business,
        _ => CabinClass::Economy,
    }
}

#[derive(Debug, Deserialize)]
struct LowFaresResponse {
    #[serde(default)]
    results: Vec<RouteResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteResult {
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    daily_low_fare_availabilities: Vec<DayAvailability>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DayAvailability {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    sold_out: Option<bool>,
    #[serde(default)]
    no_flights: Option<bool>,
    #[serde(default)]
    low_fares: Vec<LowFare>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LowFare {
    #[serde(default)]
    product_class_type: Option<String>,
    #[serde(default)]
    product_class: Option<String>,
    #[serde(default)]
    base_fare_and_tax: Option<f64>,
}

pub(crate) fn parse_low_fares(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: LowFaresResponse = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for result in &parsed.results {
        let api_origin = result
            .origin
            .as_deref()
            .unwrap_or(origin)
            .to_ascii_uppercase();
        let api_dest = result
            .destination
            .as_deref()
            .unwrap_or(destination)
            .to_ascii_uppercase();

        for day in &result.daily_low_fare_availabilities {
            if day.sold_out.unwrap_or(false) || day.no_flights.unwrap_or(false) {
                continue;
            }
            let Some(date) = day
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(&d[..10.min(d.len())], "%Y-%m-%d").ok())
            else {
                tracing::warn!("Invalid date: {:?}", day.date);
                continue;
            };
            let dep_dt = date.and_hms_opt(0, 0, 0).unwrap().and_utc();

            for fare in &day.low_fares {
                let fare_cabin =
                    cabin_of_product(fare.product_class_type.as_deref().unwrap_or("EY"));
                if fare_cabin != cabin_class {
                    continue;
                }
                let Some(total) = fare.base_fare_and_tax.filter(|p| *p > 0.0) else {
                    continue;
                };
                let mut price = NormalizedPrice::new(total, "KRW", DataSource::DirectCrawl, now);
                price.fare_class = fare.product_class.clone();

                flights.push(NormalizedFlight {
                    flight_number: synthetic_flight_number("YP", &api_origin, &api_dest),
                    airline_code: "YP".to_string(),
                    airline_name: Some("Air Premia".to_string()),
                    operator: "YP".to_string(),
                    origin: api_origin.clone(),
                    destination: api_dest.clone(),
                    departure_time: dep_dt,
                    arrival_time: dep_dt,
                    duration_minutes: 0,
                    cabin_class: fare_cabin,
                    aircraft_type: None,
                    stops: 0,
                    prices: vec![price],
                    source: DataSource::DirectCrawl,
                    source_tags: vec![],
                    crawled_at: now,
                });
            }
        }
    }
    Ok(flights)
}

pub struct AirPremiaCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl AirPremiaCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    async fn low_fares(
        &self,
        origin: &str,
        destination: &str,
        from_date: &str,
        to_date: &str,
    ) -> FetchResult<String> {
        let url = format!("{BASE_URL}/api/v1/low-fares");
        let query = [
            ("origin", origin.to_string()),
            ("destination", destination.to_string()),
            ("fromDate", from_date.to_string()),
            ("toDate", to_date.to_string()),
        ];
        let headers = [("Accept", "application/json"), ("Referer", BASE_URL)];
        // Homepage warm-up solves the CF challenge on this fingerprint.
        self.retry
            .run(
                || self.http.get_with_query(&url, &headers, &query, &[BASE_URL]),
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for AirPremiaCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let from = req.departure_date.format("%Y-%m-%d").to_string();
            let to = (req.departure_date + chrono::Duration::days(30))
                .format("%Y-%m-%d")
                .to_string();
            let body = self
                .low_fares(&req.origin, &req.destination, &from, &to)
                .await?;
            parse_low_fares(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        // Route list is outside the CF-challenged path prefix.
        self.http
            .get(&format!("{BASE_URL}/api/v1/airports"), &[], &[])
            .await
            .is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "air_premia"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(AirPremiaCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_cabin_fares_filter_to_requested_cabin() {
        let body = r#"{
            "results": [{
                "origin": "ICN", "destination": "LAX",
                "dailyLowFareAvailabilities": [{
                    "date": "2026-05-01",
                    "lowFares": [
                        {"productClassType": "EY", "productClass": "Lite", "baseFareAndTax": 450000.0},
                        {"productClassType": "PE", "productClass": "Flex", "baseFareAndTax": 890000.0}
                    ]
                }]
            }]
        }"#;
        let economy = parse_low_fares(body, "ICN", "LAX", CabinClass::Economy).unwrap();
        assert_eq!(economy.len(), 1);
        assert_eq!(economy[0].prices[0].amount, 450000.0);

        let premium = parse_low_fares(body, "ICN", "LAX", CabinClass::PremiumEconomy).unwrap();
        assert_eq!(premium.len(), 1);
        assert_eq!(premium[0].cabin_class, CabinClass::PremiumEconomy);
    }
}
