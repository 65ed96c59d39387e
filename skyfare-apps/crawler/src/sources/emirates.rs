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

//! # Emirates Source
//!
//! Public `service/featured-fares` endpoint the Next.js SPA consumes.
//! Promotional fare cards per origin, one synthetic row per card matching
//! the requested route; the card's `travelFrom` date stands in for the
//! departure day. Prices come formatted (`"KRW 957,500*"`).

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
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

const BASE_URL: &str = "https://www.emirates.com";

static PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d.]+").unwrap());

fn parse_card_price(s: &str) -> Option<f64> {
    PRICE_RE
        .find(&s.replace(',', ""))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|p| *p > 0.0)
}

fn cabin_of_code(code: &str, fallback: CabinClass) -> CabinClass {
    match code {
        "Y" => CabinClass::Economy,
        "W" => CabinClass::PremiumEconomy,
        "J" => CabinClass::Business,
        "F" => CabinClass::First,
        _ => fallback,
    }
}

#[derive(Debug, Deserialize)]
struct FeaturedFaresEnvelope {
    #[serde(default)]
    results: Option<FeaturedResults>,
}

#[derive(Debug, Deserialize)]
struct FeaturedResults {
    #[serde(default)]
    data: Option<FeaturedData>,
}

#[derive(Debug, Deserialize)]
struct FeaturedData {
    #[serde(default)]
    fares: Vec<OriginFares>,
}

#[derive(Debug, Deserialize)]
struct OriginFares {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    destinations: Vec<DestinationFare>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DestinationFare {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    call_out_price: Option<String>,
    #[serde(default, rename = "currencycode")]
    currency_code: Option<String>,
    #[serde(default)]
    travel_class_code: Option<String>,
    /// `"09 Feb 26"`.
    #[serde(default)]
    travel_from: Option<String>,
}

pub(crate) fn parse_featured_fares(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_fallback: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: FeaturedFaresEnvelope = serde_json::from_str(body)?;
    let Some(data) = parsed.results.and_then(|r| r.data) else {
        return Ok(Vec::new());
    };
    let now = Utc::now();
    let mut flights = Vec::new();

    for origin_block in &data.fares {
        let card_origin = origin_block
            .code
            .as_deref()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if card_origin != origin {
            continue;
        }
        for dest in &origin_block.destinations {
            let card_dest = dest.code.as_deref().unwrap_or_default().to_ascii_uppercase();
            if card_dest != destination {
                continue;
            }
            let Some(amount) = dest.call_out_price.as_deref().and_then(parse_card_price)
            else {
                continue;
            };
            let Some(date) = dest
                .travel_from
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%d %b %y").ok())
            else {
                continue;
            };
            let dep_dt = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
            let cabin = cabin_of_code(
                dest.travel_class_code.as_deref().unwrap_or(""),
                cabin_fallback,
            );

            let mut price = NormalizedPrice::new(
                amount,
                dest.currency_code.as_deref().unwrap_or("AED"),
                DataSource::DirectCrawl,
                now,
            );
            price.fare_class = Some("featured".to_string());

            flights.push(NormalizedFlight {
                flight_number: synthetic_flight_number("EK", &card_origin, &card_dest),
                airline_code: "EK".to_string(),
                airline_name: Some("Emirates".to_string()),
                operator: "EK".to_string(),
                origin: card_origin.clone(),
                destination: card_dest,
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
    }
    Ok(flights)
}

pub struct EmiratesCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl EmiratesCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    async fn featured_fares(&self, country_code: &str) -> FetchResult<String> {
        let url = format!("{BASE_URL}/service/featured-fares");
        let query = [
            ("countryLanguage", "en".to_string()),
            ("geocountrycode", country_code.to_string()),
            ("promoted", "false".to_string()),
            ("isTerms", "false".to_string()),
        ];
        self.retry
            .run(
                || {
                    self.http.get_with_query(
                        &url,
                        &[("Accept", "application/json")],
                        &query,
                        &[],
                    )
                },
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for EmiratesCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            // Point-of-sale follows the origin country; KR covers the
            // Korean-origin searches this fleet is tuned for.
            let body = self.featured_fares("KR").await?;
            parse_featured_fares(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        // GeoIP service is tiny and unauthenticated.
        self.http
            .get(&format!("{BASE_URL}/service/geo"), &[], &[])
            .await
            .is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "emirates"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(EmiratesCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn featured_cards_filter_by_route() {
        let body = r#"{
            "results": {"data": {"fares": [{
                "code": "ICN",
                "destinations": [
                    {
                        "code": "DXB",
                        "callOutPrice": "KRW 957,500*",
                        "currencycode": "KRW",
                        "travelClassCode": "Y",
                        "travelFrom": "09 Feb 26"
                    },
                    {
                        "code": "LHR",
                        "callOutPrice": "KRW 1,457,500*",
                        "currencycode": "KRW",
                        "travelClassCode": "J",
                        "travelFrom": "09 Feb 26"
                    }
                ]
            }]}}
        }"#;
        let flights = parse_featured_fares(body, "ICN", "DXB", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].flight_number, "EK-ICNDXB");
        assert_eq!(flights[0].prices[0].amount, 957500.0);
    }

    #[test]
    fn formatted_prices_parse() {
        assert_eq!(parse_card_price("KRW 881,700*"), Some(881700.0));
        assert_eq!(parse_card_price("1,234.56"), Some(1234.56));
        assert_eq!(parse_card_price("call us"), None);
    }
}
