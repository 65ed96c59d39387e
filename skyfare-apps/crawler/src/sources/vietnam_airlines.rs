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

//! # Vietnam Airlines Source
//!
//! Public middleware API (`integration-middleware-website`), Spring
//! backend without TLS fingerprint checks — Chrome emulation kept as a
//! precaution. Two calls per crawl: the schedule table gives real flights
//! with GMT offsets and aircraft; the best-price calendar gives the
//! per-day lowest fare, attached to the schedule flights on the matching
//! date. Currency follows the `location` country parameter.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use skyfare_query_queues::RetryPolicy;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
};
use crate::sources::normalize::{duration_minutes_mod24, local_to_utc};
use crate::transport::ImpersonateClient;

const BASE_URL: &str =
    "https://integration-middleware-website.vietnamairlines.com/api/v1";

#[derive(Debug, Deserialize)]
struct ScheduleEnvelope {
    #[serde(default)]
    data: Option<ScheduleData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleData {
    #[serde(default)]
    departure_flight: Option<DepartureFlight>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepartureFlight {
    #[serde(default)]
    schedule_items: Vec<ScheduleItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleItem {
    #[serde(default)]
    connected_flights: Vec<ConnectedFlight>,
    #[serde(default)]
    number_of_stops: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedFlight {
    #[serde(default)]
    flight_info: Option<FlightInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightInfo {
    #[serde(default)]
    marketing_airline_code: Option<String>,
    #[serde(default)]
    marketing_flight_number: Option<String>,
    #[serde(default)]
    operating_airline_code: Option<String>,
    #[serde(default)]
    air_equipment_code: Option<String>,
    #[serde(default)]
    departure_location: Option<LocationInfo>,
    #[serde(default)]
    arrival_location: Option<LocationInfo>,
    /// Seconds.
    #[serde(default)]
    duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationInfo {
    #[serde(default)]
    location_code: Option<String>,
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    date_time_zone_gmt_offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BestPriceEnvelope {
    #[serde(default)]
    data: Option<BestPriceData>,
}

#[derive(Debug, Deserialize)]
struct BestPriceData {
    #[serde(default)]
    prices: Vec<BestPriceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BestPriceEntry {
    #[serde(default)]
    departure_date: Option<String>,
    #[serde(default)]
    price: Vec<BestPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BestPrice {
    #[serde(default)]
    total: Option<f64>,
    #[serde(default)]
    currency_code: Option<String>,
}

fn parse_location_time(loc: &LocationInfo) -> Option<DateTime<Utc>> {
    let raw = loc.date_time.as_deref()?;
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .ok()?;
    Some(local_to_utc(naive, loc.date_time_zone_gmt_offset.unwrap_or(0)))
}

/// Per-day lowest fares keyed by departure date.
fn parse_best_prices(body: &str) -> FetchResult<HashMap<NaiveDate, (f64, String)>> {
    let parsed: BestPriceEnvelope = serde_json::from_str(body)?;
    let mut map = HashMap::new();
    let Some(data) = parsed.data else {
        return Ok(map);
    };
    for entry in &data.prices {
        let Some(date) = entry
            .departure_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(&d[..10.min(d.len())], "%Y-%m-%d").ok())
        else {
            continue;
        };
        let Some(best) = entry
            .price
            .iter()
            .filter_map(|p| p.total.map(|t| (t, p.currency_code.clone())))
            .filter(|(t, _)| *t > 0.0)
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        else {
            continue;
        };
        map.insert(date, (best.0, best.1.unwrap_or_else(|| "VND".to_string())));
    }
    Ok(map)
}

/// Schedule flights with the matching day's lowest fare attached.
pub(crate) fn parse_schedule_with_prices(
    schedule_body: &str,
    best_price_body: Option<&str>,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: ScheduleEnvelope = serde_json::from_str(schedule_body)?;
    let day_prices = match best_price_body {
        Some(body) => parse_best_prices(body).unwrap_or_default(),
        None => HashMap::new(),
    };

    let now = Utc::now();
    let mut flights = Vec::new();
    let items = parsed
        .data
        .and_then(|d| d.departure_flight)
        .map(|d| d.schedule_items)
        .unwrap_or_default();

    for item in &items {
        let infos: Vec<&FlightInfo> = item
            .connected_flights
            .iter()
            .filter_map(|c| c.flight_info.as_ref())
            .collect();
        let (Some(first), Some(last)) = (infos.first(), infos.last()) else {
            continue;
        };
        let (Some(dep_loc), Some(arr_loc)) =
            (first.departure_location.as_ref(), last.arrival_location.as_ref())
        else {
            continue;
        };
        let (Some(dep), Some(arr)) = (parse_location_time(dep_loc), parse_location_time(arr_loc))
        else {
            continue;
        };

        let airline = first
            .marketing_airline_code
            .as_deref()
            .unwrap_or("VN")
            .to_ascii_uppercase();
        let number = first.marketing_flight_number.as_deref().unwrap_or_default();
        if number.is_empty() {
            continue;
        }

        let total_duration: i64 = infos.iter().filter_map(|i| i.duration).sum::<i64>() / 60;
        let duration_minutes = if total_duration > 0 {
            total_duration
        } else {
            duration_minutes_mod24(dep, arr)
        };

        let prices = day_prices
            .get(&dep.date_naive())
            .map(|(amount, currency)| {
                let mut p =
                    NormalizedPrice::new(*amount, currency.clone(), DataSource::DirectCrawl, now);
                p.fare_class = Some("lowest".to_string());
                vec![p]
            })
            .unwrap_or_default();

        flights.push(NormalizedFlight {
            flight_number: format!("{airline}{number}"),
            airline_code: airline.clone(),
            airline_name: Some("Vietnam Airlines".to_string()),
            operator: first
                .operating_airline_code
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or(&airline)
                .to_string(),
            origin: dep_loc
                .location_code
                .as_deref()
                .unwrap_or_default()
                .to_ascii_uppercase(),
            destination: arr_loc
                .location_code
                .as_deref()
                .unwrap_or_default()
                .to_ascii_uppercase(),
            departure_time: dep,
            arrival_time: arr,
            duration_minutes,
            cabin_class,
            aircraft_type: first.air_equipment_code.clone(),
            stops: item
                .number_of_stops
                .unwrap_or((infos.len() as u32).saturating_sub(1)),
            prices,
            source: DataSource::DirectCrawl,
            source_tags: vec![],
            crawled_at: now,
        });
    }
    Ok(flights)
}

pub struct VietnamAirlinesCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl VietnamAirlinesCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    fn location_of(origin: &str) -> &'static str {
        match origin {
            "ICN" | "GMP" | "PUS" => "KR",
            "HAN" | "SGN" | "DAD" => "VN",
            _ => "VN",
        }
    }

    async fn schedule_table(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
    ) -> FetchResult<String> {
        let url = format!("{BASE_URL}/public/flight/schedule-table");
        let query = [
            ("departure", origin.to_string()),
            ("arrival", destination.to_string()),
            ("departureDate", date.to_string()),
        ];
        self.http
            .get_with_query(&url, &[("Accept", "application/json")], &query, &[])
            .await
    }

    async fn best_prices(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
    ) -> FetchResult<String> {
        let url = format!("{BASE_URL}/public/booking/air-best-price");
        let body = json!({
            "departure": origin,
            "arrival": destination,
            "departureDate": date,
            "journeyType": "ONE_WAY",
            "location": Self::location_of(origin),
        });
        self.http
            .post_json(&url, &[("Accept", "application/json")], &body, &[])
            .await
    }
}

#[async_trait]
impl SourceCrawler for VietnamAirlinesCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let date = req.departure_date.format("%Y-%m-%d").to_string();
            let schedule = self
                .retry
                .run(
                    || self.schedule_table(&req.origin, &req.destination, &date),
                    CrawlError::is_retryable,
                )
                .await?;
            // Price calendar failing should not kill the schedule data.
            let best = self
                .best_prices(&req.origin, &req.destination, &date)
                .await
                .ok();
            parse_schedule_with_prices(&schedule, best.as_deref(), req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        let date = (Utc::now().date_naive() + chrono::Duration::days(7))
            .format("%Y-%m-%d")
            .to_string();
        self.schedule_table("HAN", "SGN", &date).await.is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "vietnam_airlines"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(VietnamAirlinesCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEDULE: &str = r#"{
        "data": {"departureFlight": {"scheduleItems": [{
            "numberOfStops": 0,
            "connectedFlights": [{
                "flightInfo": {
                    "marketingAirlineCode": "VN",
                    "marketingFlightNumber": "417",
                    "operatingAirlineCode": "VN",
                    "airEquipmentCode": "359",
                    "departureLocation": {
                        "locationCode": "ICN",
                        "dateTime": "2026-03-15T10:30:00",
                        "dateTimeZoneGmtOffset": 9
                    },
                    "arrivalLocation": {
                        "locationCode": "HAN",
                        "dateTime": "2026-03-15T13:25:00",
                        "dateTimeZoneGmtOffset": 7
                    },
                    "duration": 17700
                }
            }]
        }]}}
    }"#;

    const BEST: &str = r#"{
        "data": {"prices": [{
            "departureDate": "2026-03-15",
            "price": [
                {"total": 5300000.0, "totalTaxes": 900000.0, "currencyCode": "VND"},
                {"total": 4800000.0, "totalTaxes": 800000.0, "currencyCode": "VND"}
            ]
        }]}
    }"#;

    #[test]
    fn schedule_joins_daily_best_price() {
        let flights =
            parse_schedule_with_prices(SCHEDULE, Some(BEST), CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "VN417");
        // 10:30 +09:00 == 01:30 UTC
        assert_eq!(f.departure_time.format("%H:%M").to_string(), "01:30");
        assert_eq!(f.duration_minutes, 295);
        assert_eq!(f.prices.len(), 1);
        assert_eq!(f.prices[0].amount, 4800000.0);
    }

    #[test]
    fn schedule_survives_missing_price_calendar() {
        let flights = parse_schedule_with_prices(SCHEDULE, None, CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        assert!(flights[0].prices.is_empty());
    }
}
