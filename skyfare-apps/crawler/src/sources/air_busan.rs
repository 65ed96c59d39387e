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

//! # Air Busan Source
//!
//! `www.airbusan.com` sits behind Cloudflare, but the WAF whitelists the
//! Naver search-crawler User-Agent: `Yeti/1.1` bypasses the JS challenge
//! outright — no cookies, warm-up, or CSRF. The `flightsAvail` booking API
//! returns individual flights with per-class fares (S/L/A/E) and a
//! top-level tax/fuel breakdown that folds into every amount.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
};
use crate::sources::normalize::{local_to_utc, parse_hhmm, parse_yyyymmdd};
use crate::transport::ImpersonateClient;

const BASE_URL: &str = "https://www.airbusan.com";

const YETI_HEADERS: &[(&str, &str)] = &[
    ("User-Agent", "Yeti/1.1 (NHN Corp.; https://help.naver.com/robots/)"),
    ("Accept", "application/json, text/javascript, */*; q=0.01"),
    ("X-Requested-With", "XMLHttpRequest"),
    ("Referer", "https://www.airbusan.com/web/individual/booking/international"),
    ("Origin", "https://www.airbusan.com"),
];

const KST_OFFSET_HOURS: i64 = 9;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightsAvailResponse {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_desc: Option<String>,
    #[serde(default)]
    list_itinerary_fare: Vec<ItineraryFare>,
    #[serde(default)]
    pub_tax_fuel: Option<TaxFuel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItineraryFare {
    #[serde(default)]
    dep_date: Option<String>,
    #[serde(default)]
    list_flight: Vec<Flight>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Flight {
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
    dep_city: Option<String>,
    #[serde(default)]
    arr_city: Option<String>,
    #[serde(default)]
    flying_minute: Option<i64>,
    #[serde(default)]
    list_cls: Vec<FareClass>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FareClass {
    #[serde(default)]
    cls: Option<String>,
    #[serde(default)]
    sub_cls: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    price_ad: Option<f64>,
    #[serde(default)]
    avail: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaxFuel {
    #[serde(default)]
    tax_ad: Option<f64>,
    #[serde(default)]
    fuel_ad: Option<f64>,
}

pub(crate) fn parse_flights_avail(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: FlightsAvailResponse = serde_json::from_str(body)?;
    if let Some(code) = parsed.error_code.as_deref().filter(|c| !c.is_empty()) {
        return Err(CrawlError::UpstreamAdvisory(format!(
            "Air Busan {code} {}",
            parsed.error_desc.unwrap_or_default()
        )));
    }

    let now = Utc::now();
    // Tax and fuel surcharge apply per passenger to every fare in the
    // response; total = base fare + tax + fuel.
    let (tax_ad, fuel_ad) = parsed
        .pub_tax_fuel
        .as_ref()
        .map(|t| (t.tax_ad.unwrap_or(0.0), t.fuel_ad.unwrap_or(0.0)))
        .unwrap_or((0.0, 0.0));

    let mut flights = Vec::new();

    for itin in &parsed.list_itinerary_fare {
        for flt in &itin.list_flight {
            let Some(flight_no) = flt.flight_no.as_deref().filter(|f| !f.is_empty()) else {
                continue;
            };
            let dep_date = flt.dep_date.as_deref().or(itin.dep_date.as_deref());
            let Some(dep_date) = dep_date.and_then(parse_yyyymmdd) else {
                continue;
            };
            let arr_date = flt
                .arr_date
                .as_deref()
                .and_then(parse_yyyymmdd)
                .unwrap_or(dep_date);
            let (Some(dep_time), Some(arr_time)) = (
                flt.dep_time.as_deref().and_then(parse_hhmm),
                flt.arr_time.as_deref().and_then(parse_hhmm),
            ) else {
                tracing::warn!("Invalid date/time for Air Busan {flight_no}");
                continue;
            };

            let departure = local_to_utc(dep_date.and_time(dep_time), KST_OFFSET_HOURS);
            let arrival = local_to_utc(arr_date.and_time(arr_time), KST_OFFSET_HOURS);

            let mut prices = Vec::new();
            for cls in &flt.list_cls {
                let Some(price_ad) = cls.price_ad.filter(|p| *p > 0.0) else {
                    continue;
                };
                if cls.avail.unwrap_or(0) <= 0 {
                    continue;
                }
                let fare_class = match (cls.cls.as_deref(), cls.sub_cls.as_deref()) {
                    (Some(c), Some(s)) if !s.is_empty() => Some(format!("{c}/{s}")),
                    (Some(c), _) => Some(c.to_string()),
                    _ => None,
                };
                let mut price = NormalizedPrice::new(
                    price_ad + tax_ad + fuel_ad,
                    cls.currency.as_deref().unwrap_or("KRW"),
                    DataSource::DirectCrawl,
                    now,
                );
                price.fare_class = fare_class;
                prices.push(price);
            }
            if prices.is_empty() {
                continue;
            }

            flights.push(NormalizedFlight {
                flight_number: flight_no.to_string(),
                airline_code: "BX".to_string(),
                airline_name: Some("Air Busan".to_string()),
                operator: "BX".to_string(),
                origin: flt
                    .dep_city
                    .as_deref()
                    .unwrap_or(origin)
                    .to_ascii_uppercase(),
                destination: flt
                    .arr_city
                    .as_deref()
                    .unwrap_or(destination)
                    .to_ascii_uppercase(),
                departure_time: departure,
                arrival_time: arrival,
                duration_minutes: flt.flying_minute.unwrap_or(0),
                cabin_class,
                aircraft_type: None,
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

pub struct AirBusanCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl AirBusanCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    async fn flights_avail(
        &self,
        origin: &str,
        destination: &str,
        departure_date: &str,
        adults: u8,
        children: u8,
        infants: u8,
    ) -> FetchResult<String> {
        let form = [
            ("tripType", "OW".to_string()),
            ("depCity1", origin.to_string()),
            ("arrCity1", destination.to_string()),
            ("depDate1", departure_date.to_string()),
            ("paxCountAd", adults.to_string()),
            ("paxCountCh", children.to_string()),
            ("paxCountIn", infants.to_string()),
            ("bookingCategory", "Individual".to_string()),
        ];
        let url = format!("{BASE_URL}/web/bookingApi/flightsAvail");
        self.retry
            .run(
                || self.http.post_form(&url, YETI_HEADERS, &form, &[]),
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for AirBusanCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self
                .flights_avail(
                    &req.origin,
                    &req.destination,
                    &req.departure_date.format("%Y%m%d").to_string(),
                    req.passengers.adults,
                    req.passengers.children,
                    req.passengers.infants(),
                )
                .await?;
            parse_flights_avail(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        let date = (Utc::now().date_naive() + chrono::Duration::days(30))
            .format("%Y%m%d")
            .to_string();
        match self.flights_avail("PUS", "CJU", &date, 1, 0, 0).await {
            Ok(body) => serde_json::from_str::<FlightsAvailResponse>(&body)
                .map(|r| !r.list_itinerary_fare.is_empty())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "air_busan"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(AirBusanCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "listItineraryFare": [{
            "depDate": "20260401",
            "listFlight": [{
                "flightNo": "BX164",
                "depDate": "20260401",
                "arrDate": "20260401",
                "depTime": "0905",
                "arrTime": "1120",
                "depCity": "PUS",
                "arrCity": "NRT",
                "flyingMinute": 135,
                "listCls": [
                    {"cls": "S", "subCls": "A", "currency": "KRW", "priceAd": 80000.0, "avail": 9},
                    {"cls": "L", "subCls": "", "currency": "KRW", "priceAd": 110000.0, "avail": 4},
                    {"cls": "E", "subCls": "", "currency": "KRW", "priceAd": 150000.0, "avail": 0}
                ]
            }]
        }],
        "pubTaxFuel": {"taxAd": 28400.0, "fuelAd": 13200.0}
    }"#;

    #[test]
    fn fares_fold_tax_and_fuel_into_amounts() {
        let flights = parse_flights_avail(SAMPLE, "PUS", "NRT", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "BX164");
        // Sold-out class E dropped; two fare tiers remain.
        assert_eq!(f.prices.len(), 2);
        assert_eq!(f.prices[0].amount, 80000.0 + 28400.0 + 13200.0);
        assert_eq!(f.prices[0].fare_class.as_deref(), Some("S/A"));
        assert_eq!(f.prices[1].fare_class.as_deref(), Some("L"));
        // 09:05 KST == 00:05 UTC
        assert_eq!(f.departure_time.format("%H:%M").to_string(), "00:05");
        assert_eq!(f.duration_minutes, 135);
    }

    #[test]
    fn api_error_codes_surface_verbatim() {
        let body = r#"{"errorCode": "B102", "errorDesc": "no schedule"}"#;
        assert!(matches!(
            parse_flights_avail(body, "PUS", "NRT", CabinClass::Economy).unwrap_err(),
            CrawlError::UpstreamAdvisory(_)
        ));
    }
}
