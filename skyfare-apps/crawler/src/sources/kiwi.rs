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

//! # Kiwi Tequila Source
//!
//! Aggregator API at `api.tequila.kiwi.com/v2/search`, authenticated with
//! the `apikey` header. Each itinerary carries one price; every route
//! segment becomes its own flight with that price attached, so per-leg
//! schedule data survives normalization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    SearchRequest,
};
use crate::transport::DirectClient;

const BASE_URL: &str = "https://api.tequila.kiwi.com";

fn cabin_code(cabin: CabinClass) -> &'static str {
    match cabin {
        CabinClass::Economy => "M",
        CabinClass::PremiumEconomy => "W",
        CabinClass::Business => "C",
        CabinClass::First => "F",
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Itinerary>,
}

#[derive(Debug, Deserialize)]
struct Itinerary {
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    deep_link: Option<String>,
    #[serde(default)]
    bags_price: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, rename = "countryTo")]
    country_to: Option<CountryInfo>,
    #[serde(default)]
    route: Vec<RouteSegment>,
}

#[derive(Debug, Deserialize)]
struct CountryInfo {
    #[serde(default)]
    cur: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouteSegment {
    #[serde(rename = "flyFrom", default)]
    fly_from: Option<String>,
    #[serde(rename = "flyTo", default)]
    fly_to: Option<String>,
    #[serde(rename = "dTime", default)]
    d_time: Option<i64>,
    #[serde(rename = "aTime", default)]
    a_time: Option<i64>,
    #[serde(default)]
    airline: Option<String>,
    #[serde(default)]
    flight_no: Option<u32>,
    #[serde(default)]
    operating_carrier: Option<String>,
}

fn epoch_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
}

/// One flight per route segment; the itinerary price rides on each.
pub(crate) fn parse_search_response(
    body: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: SearchResponse = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for itinerary in &parsed.data {
        let Some(amount) = itinerary.price.filter(|p| *p > 0.0) else {
            continue;
        };
        let currency = itinerary
            .country_to
            .as_ref()
            .and_then(|c| c.cur.as_deref())
            .unwrap_or("KRW");
        // A zero-cost first bag means baggage is included in the fare.
        let includes_baggage = itinerary
            .bags_price
            .as_ref()
            .and_then(|b| b.get("1"))
            .and_then(|v| v.as_f64())
            .map(|v| v == 0.0)
            .unwrap_or(false);

        let mut price = NormalizedPrice::new(amount, currency, DataSource::KiwiApi, now);
        price.booking_url = itinerary.deep_link.clone();
        price.includes_baggage = includes_baggage;

        for seg in &itinerary.route {
            let (Some(from), Some(to), Some(d_time), Some(a_time)) = (
                seg.fly_from.as_deref(),
                seg.fly_to.as_deref(),
                seg.d_time,
                seg.a_time,
            ) else {
                continue;
            };
            let (Some(dep), Some(arr)) = (epoch_to_utc(d_time), epoch_to_utc(a_time)) else {
                continue;
            };
            let airline = seg
                .airline
                .as_deref()
                .unwrap_or("")
                .to_ascii_uppercase();
            if airline.is_empty() {
                continue;
            }

            flights.push(NormalizedFlight {
                flight_number: format!("{airline}{}", seg.flight_no.unwrap_or(0)),
                airline_code: airline.clone(),
                airline_name: None,
                operator: seg
                    .operating_carrier
                    .clone()
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| airline.clone()),
                origin: from.to_ascii_uppercase(),
                destination: to.to_ascii_uppercase(),
                departure_time: dep,
                arrival_time: arr,
                duration_minutes: ((a_time - d_time) / 60).max(0),
                cabin_class,
                aircraft_type: None,
                stops: 0,
                prices: vec![price.clone()],
                source: DataSource::KiwiApi,
                source_tags: vec![],
                crawled_at: now,
            });
        }
    }
    Ok(flights)
}

pub struct KiwiCrawler {
    client: DirectClient,
    api_key: String,
    retry: RetryPolicy,
}

impl KiwiCrawler {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        if settings.kiwi_api_key.is_empty() {
            anyhow::bail!("CRAWLER_KIWI_API_KEY must be set for the Kiwi adapter");
        }
        Ok(Self {
            client: DirectClient::new(settings.l1_timeout)?,
            api_key: settings.kiwi_api_key.clone(),
            retry: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30)),
        })
    }

    async fn search(&self, query: &[(&str, String)]) -> FetchResult<String> {
        let url = format!("{BASE_URL}/v2/search");
        let headers = [("apikey", self.api_key.as_str())];
        self.retry
            .run(
                || self.client.get(&url, &headers, query),
                CrawlError::is_retryable,
            )
            .await
    }

    fn search_query(req: &SearchRequest) -> Vec<(&'static str, String)> {
        let date = req.departure_date.format("%d/%m/%Y").to_string();
        let mut query = vec![
            ("fly_from", req.origin.clone()),
            ("fly_to", req.destination.clone()),
            ("date_from", date.clone()),
            ("date_to", date),
            ("adults", req.passengers.adults.to_string()),
            ("children", req.passengers.children.to_string()),
            ("infants", req.passengers.infants().to_string()),
            ("selected_cabins", cabin_code(req.cabin_class).to_string()),
            ("curr", req.currency.clone()),
            ("limit", "50".to_string()),
        ];
        if let Some(ret) = req.return_date {
            let ret = ret.format("%d/%m/%Y").to_string();
            query.push(("return_from", ret.clone()));
            query.push(("return_to", ret));
        }
        query
    }
}

#[async_trait]
impl SourceCrawler for KiwiCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self.search(&Self::search_query(req)).await?;
            parse_search_response(&body, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        let query = [
            ("fly_from", "ICN".to_string()),
            ("fly_to", "NRT".to_string()),
            ("date_from", "01/01/2099".to_string()),
            ("date_to", "01/01/2099".to_string()),
            ("adults", "1".to_string()),
            ("limit", "1".to_string()),
        ];
        match self.search(&query).await {
            Ok(body) => serde_json::from_str::<SearchResponse>(&body).is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::KiwiApi
    }

    fn name(&self) -> &'static str {
        "kiwi"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(KiwiCrawler::new(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "data": [{
            "price": 185.0,
            "deep_link": "https://www.kiwi.com/deep?booking",
            "bags_price": {"1": 0},
            "countryTo": {"cur": "KRW"},
            "route": [
                {
                    "flyFrom": "ICN", "flyTo": "KIX",
                    "dTime": 1773813600, "aTime": 1773820800,
                    "airline": "7C", "flight_no": 1382,
                    "operating_carrier": "7C"
                },
                {
                    "flyFrom": "KIX", "flyTo": "NRT",
                    "dTime": 1773828000, "aTime": 1773833400,
                    "airline": "MM", "flight_no": 316,
                    "operating_carrier": ""
                }
            ]
        }]
    }"#;

    #[test]
    fn segments_become_flights_sharing_the_itinerary_price() {
        let flights = parse_search_response(SAMPLE, CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 2);
        assert_eq!(flights[0].flight_number, "7C1382");
        assert_eq!(flights[1].flight_number, "MM316");
        assert_eq!(flights[1].operator, "MM");
        for f in &flights {
            assert_eq!(f.prices.len(), 1);
            assert_eq!(f.prices[0].amount, 185.0);
            assert!(f.prices[0].includes_baggage);
            assert!(f.duration_minutes > 0);
        }
    }

    #[test]
    fn bad_shape_is_a_typed_error() {
        assert!(matches!(
            parse_search_response("[]", CabinClass::Economy).unwrap_err(),
            CrawlError::ResponseShape(_)
        ));
    }
}
