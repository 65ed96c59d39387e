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

//! # Malaysia Airlines Source
//!
//! AEM Sling servlet `/bin/mh/revamp/lowFares` feeding the booking
//! widget's date picker. One-way mode (`firstdate` in `DDMMYY`) returns
//! ~30 days of daily lowest fares; fare and tax are separate strings that
//! fold into one amount.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    synthetic_flight_number,
};
use crate::transport::ImpersonateClient;

const BASE_URL: &str = "https://www.malaysiaairlines.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LowFareEntry {
    #[serde(default)]
    date_of_departure: Option<String>,
    #[serde(default)]
    total_fare_amount: Option<String>,
    #[serde(default)]
    total_tax_amount: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

fn parse_ddmmyy(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%d%m%y").ok()
}

fn parse_amount(s: Option<&str>) -> f64 {
    s.and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0)
}

pub(crate) fn parse_oneway_fares(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let entries: Vec<LowFareEntry> = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for entry in &entries {
        let total = parse_amount(entry.total_fare_amount.as_deref())
            + parse_amount(entry.total_tax_amount.as_deref());
        if total <= 0.0 {
            continue;
        }
        let Some(date) = entry.date_of_departure.as_deref().and_then(parse_ddmmyy) else {
            tracing::warn!("Invalid DDMMYY date: {:?}", entry.date_of_departure);
            continue;
        };
        let dep_dt = date.and_hms_opt(0, 0, 0).unwrap().and_utc();

        let mut price = NormalizedPrice::new(
            total,
            entry.currency.as_deref().unwrap_or("MYR"),
            DataSource::DirectCrawl,
            now,
        );
        price.fare_class = Some("lowest".to_string());

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number("MH", origin, destination),
            airline_code: "MH".to_string(),
            airline_name: Some("Malaysia Airlines".to_string()),
            operator: "MH".to_string(),
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

pub struct MalaysiaAirlinesCrawler {
    http: ImpersonateClient,
    client_id: String,
    retry: RetryPolicy,
}

impl MalaysiaAirlinesCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            // The Vue widget mints one per visitor; servers log it.
            client_id: Uuid::new_v4().to_string(),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    async fn low_fares(
        &self,
        origin: &str,
        destination: &str,
        first_date: &str,
    ) -> FetchResult<String> {
        let url = format!("{BASE_URL}/bin/mh/revamp/lowFares");
        let query = [
            ("origin", origin.to_string()),
            ("destination", destination.to_string()),
            ("firstdate", first_date.to_string()),
            ("paymentType", "Cash".to_string()),
        ];
        let headers = [
            ("Accept", "application/json"),
            ("x-client-id", self.client_id.as_str()),
            ("Referer", BASE_URL),
        ];
        self.retry
            .run(
                || self.http.get_with_query(&url, &headers, &query, &[BASE_URL]),
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for MalaysiaAirlinesCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let first_date = req.departure_date.format("%d%m%y").to_string();
            let body = self
                .low_fares(&req.origin, &req.destination, &first_date)
                .await?;
            parse_oneway_fares(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        let first_date = (Utc::now().date_naive() + chrono::Duration::days(14))
            .format("%d%m%y")
            .to_string();
        self.low_fares("KUL", "SIN", &first_date).await.is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "malaysia_airlines"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(MalaysiaAirlinesCrawler::new(settings)))
}
