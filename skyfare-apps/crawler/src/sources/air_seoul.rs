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

//! # Air Seoul Source
//!
//! `flyairseoul.com` individual-flight search (`searchFlightInfo.do`) with
//! real times, flight numbers, and three fare tiers. Cloudflare binds
//! `cf_clearance` to the solver's TLS fingerprint, so the L2 leg tries a
//! straight Chrome-emulated POST first and the L3 leg keeps every request
//! inside the browser via the in-page fetch escape hatch.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{FallbackCrawler, SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    SearchRequest,
};
use crate::sources::normalize::{local_to_utc, parse_hhmm, parse_yyyymmdd};
use crate::transport::{BrowserFlow, BrowserSession, ImpersonateClient};

const BASE_URL: &str = "https://flyairseoul.com";
const SEARCH_PATH: &str = "/I/KO/searchFlightInfo.do";

const KST_OFFSET_HOURS: i64 = 9;

fn aircraft_of_type(flight_type: &str) -> Option<&'static str> {
    match flight_type {
        "321" => Some("A321"),
        "32Q" => Some("A321neo"),
        "320" => Some("A320"),
        "738" => Some("B737-800"),
        "739" => Some("B737-900"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightInfoEnvelope {
    #[serde(default)]
    fare_shop_data: Option<FareShopData>,
}

#[derive(Debug, Deserialize)]
struct FareShopData {
    #[serde(default, rename = "USE_CURRENCY")]
    use_currency: Option<String>,
    #[serde(default, rename = "flightShopDatas")]
    flight_shop_datas: Vec<FlightShop>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightShop {
    #[serde(default)]
    avail_flight: Option<bool>,
    #[serde(default)]
    flight_info_datas: Vec<FlightInfoData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightInfoData {
    #[serde(default)]
    flight_no: Option<String>,
    #[serde(default)]
    dep_date: Option<String>,
    #[serde(default)]
    arr_date: Option<String>,
    #[serde(default)]
    dep_time: Option<String>,
    #[serde(default)]
    arr_time: Option<String>,
    #[serde(default)]
    dep_airport: Option<String>,
    #[serde(default)]
    arr_airport: Option<String>,
    #[serde(default)]
    flying_time: Option<String>,
    #[serde(default)]
    flight_type: Option<String>,
    #[serde(default)]
    fare_datas: Vec<FareData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FareData {
    #[serde(default)]
    fare_type: Option<String>,
    #[serde(default)]
    fare_amount: Option<f64>,
    #[serde(default)]
    avail_seat: Option<i64>,
}

pub(crate) fn parse_flight_info(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: FlightInfoEnvelope = serde_json::from_str(body)?;
    let Some(shop_data) = parsed.fare_shop_data else {
        return Ok(Vec::new());
    };
    let currency = shop_data.use_currency.as_deref().unwrap_or("KRW");
    let now = Utc::now();
    let mut flights = Vec::new();

    for shop in &shop_data.flight_shop_datas {
        if !shop.avail_flight.unwrap_or(false) {
            continue;
        }
        for info in &shop.flight_info_datas {
            let Some(flight_no) = info.flight_no.as_deref().filter(|f| !f.is_empty()) else {
                continue;
            };
            let (Some(dep_date), Some(dep_time)) = (
                info.dep_date.as_deref().and_then(parse_yyyymmdd),
                info.dep_time.as_deref().and_then(|t| parse_hhmm(&t[..4.min(t.len())])),
            ) else {
                continue;
            };
            let arr_date = info
                .arr_date
                .as_deref()
                .and_then(parse_yyyymmdd)
                .unwrap_or(dep_date);
            let Some(arr_time) = info
                .arr_time
                .as_deref()
                .and_then(|t| parse_hhmm(&t[..4.min(t.len())]))
            else {
                continue;
            };

            let departure = local_to_utc(dep_date.and_time(dep_time), KST_OFFSET_HOURS);
            let arrival = local_to_utc(arr_date.and_time(arr_time), KST_OFFSET_HOURS);

            // Flying time is "HHMM".
            let duration_minutes = info
                .flying_time
                .as_deref()
                .and_then(parse_hhmm)
                .map(|t| {
                    use chrono::Timelike;
                    (t.hour() * 60 + t.minute()) as i64
                })
                .filter(|m| *m > 0)
                .unwrap_or_else(|| (arrival - departure).num_minutes().max(0));

            let mut prices = Vec::new();
            for fare in &info.fare_datas {
                let Some(amount) = fare.fare_amount.filter(|a| *a > 0.0) else {
                    continue;
                };
                if fare.avail_seat.unwrap_or(0) <= 0 {
                    continue;
                }
                let mut price =
                    NormalizedPrice::new(amount, currency, DataSource::DirectCrawl, now);
                price.fare_class = fare.fare_type.clone();
                prices.push(price);
            }
            if prices.is_empty() {
                continue;
            }

            flights.push(NormalizedFlight {
                flight_number: flight_no.to_string(),
                airline_code: "RS".to_string(),
                airline_name: Some("Air Seoul".to_string()),
                operator: "RS".to_string(),
                origin: info
                    .dep_airport
                    .as_deref()
                    .unwrap_or(origin)
                    .to_ascii_uppercase(),
                destination: info
                    .arr_airport
                    .as_deref()
                    .unwrap_or(destination)
                    .to_ascii_uppercase(),
                departure_time: departure,
                arrival_time: arrival,
                duration_minutes,
                cabin_class,
                aircraft_type: info
                    .flight_type
                    .as_deref()
                    .and_then(aircraft_of_type)
                    .map(str::to_string),
                stops: 0,
                prices,
                source: DataSource::DirectCrawl,
                source_tags: vec![],
                crawled_at: now,
            });
        }
    }
    Ok(flights)
}

fn search_form(req: &SearchRequest) -> Vec<(&'static str, String)> {
    vec![
        ("tripType", "OW".to_string()),
        ("depAirport", req.origin.clone()),
        ("arrAirport", req.destination.clone()),
        ("depDate", req.departure_date.format("%Y%m%d").to_string()),
        ("adultCount", req.passengers.adults.to_string()),
        ("childCount", req.passengers.children.to_string()),
        ("infantCount", req.passengers.infants().to_string()),
    ]
}

fn form_urlencoded(form: &[(&str, String)]) -> String {
    form.iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// L2 leg: straight Chrome-emulated POST with homepage warm-up. Cloudflare
/// hard-blocks this fingerprint some days; the fallback covers those.
pub struct AirSeoulL2Crawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl AirSeoulL2Crawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(1, Duration::from_secs(1), Duration::from_secs(5)),
        }
    }
}

#[async_trait]
impl SourceCrawler for AirSeoulL2Crawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let url = format!("{BASE_URL}{SEARCH_PATH}");
            let form = search_form(req);
            let headers = [
                ("X-Requested-With", "XMLHttpRequest"),
                ("Accept", "application/json, text/javascript, */*; q=0.01"),
                ("Referer", BASE_URL),
            ];
            let body = self
                .retry
                .run(
                    || self.http.post_form(&url, &headers, &form, &[BASE_URL]),
                    CrawlError::is_retryable,
                )
                .await?;
            parse_flight_info(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.http.get(BASE_URL, &[], &[]).await.is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "air_seoul_l2"
    }
}

/// L3 leg: solve the CF challenge in a real browser, then call the API
/// with `page_fetch` so the clearance cookie stays bound to the browser's
/// TLS fingerprint. Browser per call, closed on every path.
pub struct AirSeoulL3Crawler;

impl AirSeoulL3Crawler {
    async fn fetch_via_browser(&self, req: &SearchRequest) -> FetchResult<String> {
        let session = BrowserSession::launch().await?;
        let result = self.run(&session, req).await;
        let close_result = session.close().await;
        if let Err(e) = close_result {
            tracing::warn!("air_seoul: browser close failed: {e}");
        }
        result
    }

    async fn run(&self, session: &BrowserSession, req: &SearchRequest) -> FetchResult<String> {
        // Root URL triggers the CF challenge and redirects to the main
        // page once solved.
        let flow = BrowserFlow {
            entry_url: BASE_URL.to_string(),
            init_scripts: vec![],
            post_load: vec![crate::transport::FlowStep::wait_for(
                "body",
                Duration::from_secs(20),
            )],
            form_fill: vec![],
            trigger: vec![],
            capture_patterns: vec![],
            capture_timeout: Duration::from_secs(1),
        };
        // No captures declared: run_flow is only used here to navigate and
        // settle; the capture await times out immediately by design.
        let _ = session.run_flow(&flow).await;

        let form = search_form(req);
        let (status, body) = session
            .page_fetch(
                &format!("{BASE_URL}{SEARCH_PATH}"),
                "POST",
                Some(&form_urlencoded(&form)),
                Some("application/x-www-form-urlencoded; charset=UTF-8"),
            )
            .await?;
        if status == 403 {
            return Err(CrawlError::AntiBot(
                "Cloudflare blocked in-page fetch (WAF rule on POST path)".into(),
            ));
        }
        if !(200..300).contains(&status) {
            return Err(CrawlError::from_status(status, &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl SourceCrawler for AirSeoulL3Crawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self.fetch_via_browser(req).await?;
            parse_flight_info(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        match BrowserSession::launch().await {
            Ok(session) => {
                let ok = session.page_source().await.is_ok();
                let _ = session.close().await;
                ok
            }
            Err(_) => false,
        }
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "air_seoul_l3"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(FallbackCrawler::new(
        "air_seoul",
        vec![
            Box::new(AirSeoulL2Crawler::new(settings)),
            Box::new(AirSeoulL3Crawler),
        ],
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "fareShopData": {
            "USE_CURRENCY": "KRW",
            "flightShopDatas": [{
                "availFlight": true,
                "flightInfoDatas": [{
                    "flightNo": "RS705",
                    "depDate": "20260401",
                    "arrDate": "20260401",
                    "depTime": "073000",
                    "arrTime": "095500",
                    "depAirport": "ICN",
                    "arrAirport": "NRT",
                    "flyingTime": "0225",
                    "flightType": "321",
                    "fareDatas": [
                        {"fareType": "PROMOTIONAL", "fareAmount": 89000.0, "availSeat": 4},
                        {"fareType": "DISCOUNT", "fareAmount": 129000.0, "availSeat": 9},
                        {"fareType": "NORMAL", "fareAmount": 189000.0, "availSeat": 0}
                    ]
                }]
            }]
        }
    }"#;

    #[test]
    fn individual_flights_with_fare_tiers() {
        let flights = parse_flight_info(SAMPLE, "ICN", "NRT", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "RS705");
        assert_eq!(f.aircraft_type.as_deref(), Some("A321"));
        assert_eq!(f.duration_minutes, 145);
        // NORMAL tier has no seats and is dropped.
        assert_eq!(f.prices.len(), 2);
        assert_eq!(f.prices[0].fare_class.as_deref(), Some("PROMOTIONAL"));
        // 07:30 KST == 22:30 UTC previous day
        assert_eq!(
            f.departure_time.format("%Y-%m-%d %H:%M").to_string(),
            "2026-03-31 22:30"
        );
    }

    #[test]
    fn form_serialization_is_url_encoded() {
        let form = vec![("depAirport", "ICN".to_string()), ("x", "a b".to_string())];
        assert_eq!(form_urlencoded(&form), "depAirport=ICN&x=a%20b");
    }
}
