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

//! # LOT Polish Airlines Source
//!
//! AEM site with internal JSON APIs. The low-fare calendar needs Akamai JS
//! challenge completion, but the watchlist price-boxes servlet answers to
//! a Chrome TLS fingerprint after a homepage warm-up:
//!
//! ```text
//! /api/{locale}/watchlistPriceBoxesSearch.json/{ORIGIN}-{DEST}.json
//! ```

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

const BASE_URL: &str = "https://www.lot.com";
const LOCALE: &str = "en-us";

fn cabin_of_code(code: &str) -> CabinClass {
    match code {
        "P" => CabinClass::PremiumEconomy,
        "B" => CabinClass::Business,
        _ => CabinClass::Economy,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceBoxesResponse {
    #[serde(default)]
    price_boxes: Vec<PriceBox>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceBox {
    #[serde(default, rename = "originAirportIATA")]
    origin_airport_iata: Option<String>,
    #[serde(default, rename = "destinationAirportIATA")]
    destination_airport_iata: Option<String>,
    #[serde(default)]
    cabin_class_code: Option<String>,
    #[serde(default)]
    cabin_class_label: Option<String>,
    #[serde(default)]
    price_value: Option<String>,
    #[serde(default)]
    price_currency: Option<String>,
    #[serde(default)]
    trip_type_label: Option<String>,
    #[serde(default)]
    booker_departure_time: Option<String>,
    #[serde(default)]
    baggage_label: Option<String>,
}

pub(crate) fn parse_price_boxes(
    body: &str,
    origin: &str,
    destination: &str,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: PriceBoxesResponse = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for boxed in &parsed.price_boxes {
        let Some(amount) = boxed
            .price_value
            .as_deref()
            .and_then(|p| p.replace(',', "").parse::<f64>().ok())
            .filter(|p| *p > 0.0)
        else {
            continue;
        };
        let dep_iata = boxed
            .origin_airport_iata
            .as_deref()
            .unwrap_or(origin)
            .to_ascii_uppercase();
        let arr_iata = boxed
            .destination_airport_iata
            .as_deref()
            .unwrap_or(destination)
            .to_ascii_uppercase();
        // Dates come as "15-03-2026".
        let Some(date) = boxed
            .booker_departure_time
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%d-%m-%Y").ok())
        else {
            tracing::warn!("Invalid date in LOT box: {:?}", boxed.booker_departure_time);
            continue;
        };
        let dep_dt = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let cabin = cabin_of_code(boxed.cabin_class_code.as_deref().unwrap_or("E"));

        let mut price = NormalizedPrice::new(
            amount,
            boxed.price_currency.as_deref().unwrap_or("PLN"),
            DataSource::DirectCrawl,
            now,
        );
        let label = [
            boxed.cabin_class_label.as_deref(),
            boxed.trip_type_label.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("/");
        price.fare_class = (!label.is_empty()).then_some(label);
        price.includes_baggage = boxed
            .baggage_label
            .as_deref()
            .map(|l| !l.eq_ignore_ascii_case("HandLuggage"))
            .unwrap_or(false);

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number("LO", &dep_iata, &arr_iata),
            airline_code: "LO".to_string(),
            airline_name: Some("LOT Polish Airlines".to_string()),
            operator: "LO".to_string(),
            origin: dep_iata,
            destination: arr_iata,
            departure_time: dep_dt,
            arrival_time: dep_dt,
            duration_minutes: 0,
            cabin_class: cabin,
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

pub struct LotPolishCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl LotPolishCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    async fn price_boxes(&self, origin: &str, destination: &str) -> FetchResult<String> {
        let url = format!(
            "{BASE_URL}/api/{LOCALE}/watchlistPriceBoxesSearch.json/{origin}-{destination}.json"
        );
        let warmup = [BASE_URL];
        self.retry
            .run(
                || self.http.get(&url, &[("Accept", "application/json")], &warmup),
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for LotPolishCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self.price_boxes(&req.origin, &req.destination).await?;
            parse_price_boxes(&body, &req.origin, &req.destination)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.http
            .get(
                &format!("{BASE_URL}/api/{LOCALE}/airports.json"),
                &[("Accept", "application/json")],
                &[],
            )
            .await
            .is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "lot_polish"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(LotPolishCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_boxes_parse_to_synthetic_rows() {
        let body = r#"{
            "priceBoxes": [{
                "originAirportIATA": "WAW",
                "destinationAirportIATA": "ICN",
                "cabinClassCode": "E",
                "cabinClassLabel": "Economy",
                "priceValue": "2,485",
                "priceCurrency": "PLN",
                "tripTypeCode": "R",
                "tripTypeLabel": "RoundTrip",
                "bookerDepartureTime": "15-03-2026",
                "bookerReturnTime": "25-03-2026",
                "baggageCode": "H",
                "baggageLabel": "HandLuggage"
            }]
        }"#;
        let flights = parse_price_boxes(body, "WAW", "ICN").unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "LO-WAWICN");
        assert_eq!(f.prices[0].amount, 2485.0);
        assert!(!f.prices[0].includes_baggage);
        assert_eq!(f.cabin_class, CabinClass::Economy);
        assert_eq!(f.departure_time.format("%Y-%m-%d").to_string(), "2026-03-15");
    }
}
