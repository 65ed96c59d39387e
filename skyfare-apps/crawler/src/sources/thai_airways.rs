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

//! # Thai Airways Source
//!
//! Layered: the EveryMundo Sputnik tenant `tg` first, falling back to the
//! site's `/common/calendarPricing/popular-fares` endpoint (custom
//! `source`/`hostname` headers, Chrome TLS fingerprint, homepage warm-up).
//! Both avoid the fragile OSCI booking-widget automation, whose duplicate
//! element ids break form fill.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{FallbackCrawler, SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    synthetic_flight_number,
};
use crate::sources::everymundo::{SputnikCrawler, SputnikTenant};
use crate::transport::ImpersonateClient;

const BASE_URL: &str = "https://www.thaiairways.com";
const POPULAR_FARES_PATH: &str = "/common/calendarPricing/popular-fares";

static TENANT: SputnikTenant = SputnikTenant {
    tenant: "tg",
    airline_code: "TG",
    airline_name: "Thai Airways",
    referer: "https://www.thaiairways.com/en-kr/",
    origin_header: "https://www.thaiairways.com",
};

#[derive(Debug, Deserialize)]
struct PopularFaresResponse {
    #[serde(default)]
    prices: Vec<PopularFareEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PopularFareEntry {
    #[serde(default)]
    departure_airport_iata_code: Option<String>,
    #[serde(default)]
    arrival_airport_iata_code: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    fare: Option<PopularFare>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PopularFare {
    /// Formatted string like `"317,300"`.
    #[serde(default)]
    total_price: Option<String>,
    #[serde(default)]
    currency_code: Option<String>,
}

fn parse_price_string(s: &str) -> Option<f64> {
    s.replace([',', ' '], "").trim().parse().ok()
}

pub(crate) fn parse_popular_fares(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: PopularFaresResponse = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for entry in &parsed.prices {
        let dep_iata = entry
            .departure_airport_iata_code
            .as_deref()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let arr_iata = entry
            .arrival_airport_iata_code
            .as_deref()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if dep_iata != origin || arr_iata != destination {
            continue;
        }
        let Some(date) = entry
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        let Some(fare) = &entry.fare else { continue };
        let Some(amount) = fare
            .total_price
            .as_deref()
            .and_then(parse_price_string)
            .filter(|a| *a > 0.0)
        else {
            continue;
        };

        let dep_dt = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let mut price = NormalizedPrice::new(
            amount,
            fare.currency_code.as_deref().unwrap_or("KRW"),
            DataSource::DirectCrawl,
            now,
        );
        price.fare_class = Some("lowest".to_string());

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number("TG", &dep_iata, &arr_iata),
            airline_code: "TG".to_string(),
            airline_name: Some("Thai Airways".to_string()),
            operator: "TG".to_string(),
            origin: dep_iata,
            destination: arr_iata,
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

/// The popular-fares fallback leg.
pub struct ThaiPopularFaresCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl ThaiPopularFaresCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    async fn fetch_popular_fares(&self, origin: &str) -> FetchResult<String> {
        let url = format!("{BASE_URL}{POPULAR_FARES_PATH}");
        let body = json!({"origin": origin, "journeyType": "ONE_WAY"});
        let headers = [
            ("source", "website"),
            ("hostname", BASE_URL),
            ("Accept", "application/json"),
        ];
        let warmup = [TENANT.referer];
        self.retry
            .run(
                || self.http.post_json(&url, &headers, &body, &warmup),
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for ThaiPopularFaresCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self.fetch_popular_fares(&req.origin).await?;
            parse_popular_fares(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.fetch_popular_fares("ICN").await.is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "thai_popular_fares"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    let sputnik = SputnikCrawler::new("thai_sputnik", &TENANT, settings);
    let popular = ThaiPopularFaresCrawler::new(settings);
    Ok(Box::new(FallbackCrawler::new(
        "thai_airways",
        vec![Box::new(sputnik), Box::new(popular)],
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popular_fares_parse_with_formatted_prices() {
        let body = r#"{
            "prices": [
                {
                    "departureAirportIataCode": "ICN",
                    "arrivalAirportIataCode": "BKK",
                    "date": "2026-04-15",
                    "fare": {"totalPrice": "317,300", "currencyCode": "KRW"}
                },
                {
                    "departureAirportIataCode": "ICN",
                    "arrivalAirportIataCode": "HKT",
                    "date": "2026-04-15",
                    "fare": {"totalPrice": "412,000", "currencyCode": "KRW"}
                }
            ]
        }"#;
        let flights = parse_popular_fares(body, "ICN", "BKK", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].flight_number, "TG-ICNBKK");
        assert_eq!(flights[0].prices[0].amount, 317300.0);
    }
}
