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

//! # EVA Air Source
//!
//! `getBestPrices.ashx` on the booking subdomain returns up to ~300 days
//! of daily lowest one-way fares. The booking host needs cookies from the
//! main site, so the main page is warmed up first. Currency follows the
//! departure country and arrives in the response.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
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

const MAIN_PAGE: &str = "https://www.evaair.com/en-global/index.html";
const BEST_PRICES_URL: &str = "https://booking.evaair.com/flyeva/handler/getBestPrices.ashx";

#[derive(Debug, Deserialize)]
struct BestPricesEnvelope {
    #[serde(default, rename = "Succ")]
    succ: Option<bool>,
    #[serde(default, rename = "Code")]
    code: Option<String>,
    #[serde(default, rename = "Data")]
    data: Option<BestPricesData>,
}

#[derive(Debug, Deserialize)]
struct BestPricesData {
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    data: Vec<DailyPrice>,
}

#[derive(Debug, Deserialize)]
struct DailyPrice {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    highlight: Option<bool>,
}

pub(crate) fn parse_best_prices(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: BestPricesEnvelope = serde_json::from_str(body)?;
    if !parsed.succ.unwrap_or(false) {
        return Err(CrawlError::UpstreamAdvisory(format!(
            "EVA getBestPrices code {}",
            parsed.code.unwrap_or_default()
        )));
    }
    let Some(data) = parsed.data else {
        return Ok(Vec::new());
    };
    let currency = data.currency.as_deref().unwrap_or("TWD");
    let now = Utc::now();
    let mut flights = Vec::new();

    for day in &data.data {
        let Some(amount) = day.price.filter(|p| *p > 0.0) else {
            continue;
        };
        let Some(dep_dt) = day
            .date
            .as_deref()
            .and_then(|d| NaiveDateTime::parse_from_str(d, "%Y-%m-%dT%H:%M:%S").ok())
            .map(|n| n.and_utc())
        else {
            continue;
        };

        let mut price = NormalizedPrice::new(amount, currency, DataSource::DirectCrawl, now);
        price.fare_class = Some(if day.highlight.unwrap_or(false) {
            "cheapest".to_string()
        } else {
            "lowest".to_string()
        });

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number("BR", origin, destination),
            airline_code: "BR".to_string(),
            airline_name: Some("EVA Air".to_string()),
            operator: "BR".to_string(),
            origin: origin.to_string(),
            destination: destination.to_string(),
            departure_time: dep_dt,
            arrival_time: dep_dt,
            duration_minutes: 0,
            cabin_class,
            aircraft_type: None,
            stops: 0,
            prices: vec![price],
            source: DataSource::DirectCrawl,
            source_tags: vec![],
            crawled_at: now,
        });
    }
    Ok(flights)
}

pub struct EvaAirCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl EvaAirCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    async fn best_prices(&self, origin: &str, destination: &str) -> FetchResult<String> {
        let query = [
            ("dep", origin.to_string()),
            ("arr", destination.to_string()),
            ("interval", "300".to_string()),
        ];
        self.retry
            .run(
                || self.http.get_with_query(BEST_PRICES_URL, &[], &query, &[MAIN_PAGE]),
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for EvaAirCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self.best_prices(&req.origin, &req.destination).await?;
            parse_best_prices(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        match self.best_prices("TPE", "NRT").await {
            Ok(body) => serde_json::from_str::<BestPricesEnvelope>(&body)
                .map(|e| e.succ.unwrap_or(false))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "eva_air"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(EvaAirCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_prices_parse() {
        let body = r#"{
            "Succ": true,
            "Code": "0000",
            "Data": {
                "currency": "KRW",
                "data": [
                    {"date": "2026-02-15T00:00:00", "price": 168250, "highlight": false},
                    {"date": "2026-02-16T00:00:00", "price": 154800, "highlight": true},
                    {"date": "2026-02-17T00:00:00", "price": 0}
                ]
            }
        }"#;
        let flights = parse_best_prices(body, "ICN", "TPE", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 2);
        assert_eq!(flights[1].prices[0].fare_class.as_deref(), Some("cheapest"));
        assert!(flights.iter().all(|f| f.prices[0].currency == "KRW"));
    }

    #[test]
    fn upstream_failure_is_advisory() {
        let body = r#"{"Succ": false, "Code": "E999"}"#;
        assert!(matches!(
            parse_best_prices(body, "ICN", "TPE", CabinClass::Economy).unwrap_err(),
            CrawlError::UpstreamAdvisory(_)
        ));
    }
}
