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

//! # Jeju Air Source
//!
//! Lowest-fare calendar on `sec.jejuair.net`: a form POST whose
//! `lowestFareCalendar` field is a JSON payload, under a fixed channel
//! code and page id. One cheapest fare per day; fares already include
//! taxes and fees when requested so.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
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

const BASE_URL: &str = "https://sec.jejuair.net";
const CHANNEL_CODE: &str = "WPC";
const PAGE_ID: &str = "0000000294";

#[derive(Debug, Deserialize)]
struct CalendarEnvelope {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<CalendarData>,
}

#[derive(Debug, Deserialize)]
struct CalendarData {
    #[serde(default)]
    lowfares: Option<LowFares>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LowFares {
    #[serde(default)]
    currency_code: Option<String>,
    #[serde(default)]
    low_fare_date_markets: Vec<DateMarket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DateMarket {
    #[serde(default)]
    no_flights: Option<bool>,
    #[serde(default)]
    departure_date: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    lowest_fare_amount: Option<FareAmount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FareAmount {
    #[serde(default)]
    fare_amount: Option<f64>,
    #[serde(default)]
    taxes_and_fees_amount: Option<f64>,
}

fn parse_market_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

pub(crate) fn parse_lowest_fares(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: CalendarEnvelope = serde_json::from_str(body)?;
    if let Some(code) = parsed.code.as_deref() {
        if code != "0000" {
            return Err(CrawlError::UpstreamAdvisory(format!(
                "Jeju Air {code}: {}",
                parsed.message.unwrap_or_default()
            )));
        }
    }
    let Some(lowfares) = parsed.data.and_then(|d| d.lowfares) else {
        return Ok(Vec::new());
    };
    let currency = lowfares.currency_code.as_deref().unwrap_or("KRW");
    let now = Utc::now();
    let mut flights = Vec::new();

    for market in &lowfares.low_fare_date_markets {
        if market.no_flights.unwrap_or(false) {
            continue;
        }
        let Some(fare) = &market.lowest_fare_amount else {
            continue;
        };
        let total = fare.fare_amount.unwrap_or(0.0) + fare.taxes_and_fees_amount.unwrap_or(0.0);
        if total <= 0.0 {
            continue;
        }
        let Some(dep_dt) = market.departure_date.as_deref().and_then(parse_market_date)
        else {
            tracing::warn!(
                "Invalid departure date: {:?}",
                market.departure_date
            );
            continue;
        };

        let mkt_origin = market
            .origin
            .as_deref()
            .unwrap_or(origin)
            .to_ascii_uppercase();
        let mkt_dest = market
            .destination
            .as_deref()
            .unwrap_or(destination)
            .to_ascii_uppercase();

        let mut price = NormalizedPrice::new(total, currency, DataSource::DirectCrawl, now);
        price.fare_class = Some("lowest".to_string());

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number("7C", &mkt_origin, &mkt_dest),
            airline_code: "7C".to_string(),
            airline_name: Some("Jeju Air".to_string()),
            operator: "7C".to_string(),
            origin: mkt_origin,
            destination: mkt_dest,
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

pub struct JejuAirCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl JejuAirCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(15)),
        }
    }

    async fn search_lowest_fares(
        &self,
        origin: &str,
        destination: &str,
        search_month: &str,
    ) -> FetchResult<String> {
        let payload = json!({
            "tripRoute": [{
                "searchStartDate": search_month,
                "originAirport": origin,
                "destinationAirport": destination,
            }],
            "passengers": [{"type": "ADT", "count": "1"}],
            "includeTaxesAndFee": true,
        });
        let form = [
            ("lowestFareCalendar", payload.to_string()),
            ("pageId", PAGE_ID.to_string()),
        ];
        let headers = [
            ("Channel-Code", CHANNEL_CODE),
            ("User-Id", ""),
            ("User-Name", ""),
        ];
        let url = format!("{BASE_URL}/ko/ibe/booking/searchlowestFareCalendar.json");
        self.retry
            .run(
                || self.http.post_form(&url, &headers, &form, &[]),
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for JejuAirCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let month = req.departure_date.format("%Y-%m-01").to_string();
            let body = self
                .search_lowest_fares(&req.origin, &req.destination, &month)
                .await?;
            parse_lowest_fares(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        let month = (Utc::now().date_naive() + chrono::Duration::days(30))
            .format("%Y-%m-01")
            .to_string();
        self.search_lowest_fares("ICN", "CJU", &month).await.is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "jeju_air"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(JejuAirCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_days_become_synthetic_rows() {
        let body = r#"{
            "code": "0000",
            "data": {"lowfares": {
                "currencyCode": "KRW",
                "lowFareDateMarkets": [
                    {
                        "departureDate": "2026-03-01T00:00:00",
                        "origin": "ICN", "destination": "NRT",
                        "lowestFareAmount": {"fareAmount": 95000.0, "taxesAndFeesAmount": 41600.0}
                    },
                    {"noFlights": true, "departureDate": "2026-03-02T00:00:00"}
                ]
            }}
        }"#;
        let flights = parse_lowest_fares(body, "ICN", "NRT", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].flight_number, "7C-ICNNRT");
        assert_eq!(flights[0].prices[0].amount, 136600.0);
        assert!(flights[0].is_synthetic());
    }

    #[test]
    fn api_error_code_is_advisory() {
        let body = r#"{"code": "9999", "message": "route closed"}"#;
        assert!(matches!(
            parse_lowest_fares(body, "ICN", "NRT", CabinClass::Economy).unwrap_err(),
            CrawlError::UpstreamAdvisory(_)
        ));
    }
}
