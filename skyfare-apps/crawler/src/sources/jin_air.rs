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

//! # Jin Air Source
//!
//! Pre-computed daily lowest fares from the public S3 bucket behind
//! `fare.jinair.com` — no key, cookies, or TLS fingerprinting:
//!
//! ```text
//! https://fare.jinair.com/{ORIGIN}{DEST}/OW/{COUNTRY}/{CURRENCY}/totalamounts.json
//! ```
//!
//! `totalamounts.json` is fare + tax (what users pay).

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use skyfare_query_queues::RetryPolicy;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    synthetic_flight_number,
};
use crate::sources::normalize::parse_yyyymmdd;
use crate::transport::DirectClient;

const FARE_BASE: &str = "https://fare.jinair.com";

/// Currency drives the bucket path; the bucket only publishes the
/// point-of-sale currency per country.
fn country_for_currency(currency: &str) -> &'static str {
    match currency {
        "KRW" => "KR",
        "JPY" => "JP",
        "USD" => "US",
        _ => "KR",
    }
}

#[derive(Debug, Deserialize)]
struct FareBucket {
    #[serde(flatten)]
    days: HashMap<String, f64>,
}

pub(crate) fn parse_total_amounts(
    body: &str,
    origin: &str,
    destination: &str,
    currency: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let bucket: FareBucket = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for (date_key, amount) in &bucket.days {
        if *amount <= 0.0 {
            continue;
        }
        let Some(date) = parse_yyyymmdd(date_key) else {
            continue;
        };
        let dep_dt = date.and_hms_opt(0, 0, 0).unwrap().and_utc();

        let mut price = NormalizedPrice::new(*amount, currency, DataSource::DirectCrawl, now);
        price.fare_class = Some("lowest".to_string());

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number("LJ", origin, destination),
            airline_code: "LJ".to_string(),
            airline_name: Some("Jin Air".to_string()),
            operator: "LJ".to_string(),
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

    flights.sort_by_key(|f| f.departure_time);
    Ok(flights)
}

pub struct JinAirCrawler {
    client: DirectClient,
    retry: RetryPolicy,
}

impl JinAirCrawler {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            client: DirectClient::new(settings.l1_timeout)?,
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        })
    }

    async fn fetch_bucket(
        &self,
        origin: &str,
        destination: &str,
        currency: &str,
    ) -> FetchResult<String> {
        let url = format!(
            "{FARE_BASE}/{origin}{destination}/OW/{}/{currency}/totalamounts.json",
            country_for_currency(currency)
        );
        self.retry
            .run(|| self.client.get(&url, &[], &[]), CrawlError::is_retryable)
            .await
    }
}

#[async_trait]
impl SourceCrawler for JinAirCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self
                .fetch_bucket(&req.origin, &req.destination, &req.currency)
                .await?;
            parse_total_amounts(
                &body,
                &req.origin,
                &req.destination,
                &req.currency,
                req.cabin_class,
            )
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.fetch_bucket("ICN", "NRT", "KRW").await.is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "jin_air"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(JinAirCrawler::new(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_days_become_sorted_synthetic_rows() {
        let body = r#"{"20260302": 138700.0, "20260301": 121500.0, "20260303": 0}"#;
        let flights =
            parse_total_amounts(body, "ICN", "NRT", "KRW", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 2);
        assert_eq!(flights[0].prices[0].amount, 121500.0);
        assert!(flights[0].departure_time < flights[1].departure_time);
        assert!(flights.iter().all(|f| f.flight_number == "LJ-ICNNRT"));
        assert!(flights.iter().all(|f| f.is_synthetic()));
    }
}
