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

//! # T'way Air Source
//!
//! The consumer site protects fare endpoints with Akamai, but the travel
//! agency portal (`tagency.twayair.com`) serves the same API without it.
//! Flow: GET the search page to pick up the session cookie and the
//! `_csrf` meta tag, then POST `getLowestFare`. Fares come back as
//! pipe-delimited per-day strings.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
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
use crate::transport::ImpersonateClient;

const BASE_URL: &str = "https://tagency.twayair.com";

static CSRF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<meta\s+name="_csrf"\s+content="([^"]+)""#).unwrap());

#[derive(Debug, Deserialize)]
struct LowestFareResponse {
    #[serde(default, rename = "OW")]
    ow: HashMap<String, String>,
}

/// Pipe fields:
/// `date|dep|arr|soldOut|bizSoldOut|operating|bizOperating|fare|totalFare|fareClass`.
pub(crate) fn parse_lowest_fares(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
    currency: &str,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: LowestFareResponse = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for fare_str in parsed.ow.values() {
        if fare_str.is_empty() {
            continue;
        }
        let parts: Vec<&str> = fare_str.split('|').collect();
        if parts.len() < 9 {
            continue;
        }
        let date_str = parts[0];
        let dep = if parts[1].is_empty() { origin } else { parts[1] };
        let arr = if parts[2].is_empty() {
            destination
        } else {
            parts[2]
        };
        let sold_out = parts[3] == "Y";
        let operating = parts[5] == "Y";
        if !operating || sold_out {
            continue;
        }
        let Ok(total_fare) = parts[8].parse::<f64>() else {
            continue;
        };
        if total_fare <= 0.0 {
            continue;
        }
        let Some(date) = parse_yyyymmdd(date_str) else {
            tracing::warn!("Invalid date in T'way fare: {date_str}");
            continue;
        };
        let dep_dt = date.and_hms_opt(0, 0, 0).unwrap().and_utc();

        let mut price = NormalizedPrice::new(total_fare, currency, DataSource::DirectCrawl, now);
        price.fare_class = parts.get(9).filter(|s| !s.is_empty()).map(|s| s.to_string());

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number("TW", dep, arr),
            airline_code: "TW".to_string(),
            airline_name: Some("T'way Air".to_string()),
            operator: "TW".to_string(),
            origin: dep.to_ascii_uppercase(),
            destination: arr.to_ascii_uppercase(),
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

pub struct TwayAirCrawler {
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl TwayAirCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    /// The CSRF token is bound to the session cookie, so the session page
    /// GET and the fare POST must share one client.
    async fn fetch_fares(
        &self,
        origin: &str,
        destination: &str,
        currency: &str,
    ) -> FetchResult<String> {
        let session_url = format!("{BASE_URL}/app/booking/searchItinerary");
        let form = [
            ("tripType", "OW".to_string()),
            ("bookingType", "PASSENGER".to_string()),
            ("currency", currency.to_string()),
            ("depAirport", origin.to_string()),
            ("arrAirport", destination.to_string()),
            ("baseDeptAirportCode", origin.to_string()),
        ];
        let (session_body, body) = self
            .http
            .session_then_post_form(
                &session_url,
                &format!("{BASE_URL}/ajax/booking/getLowestFare"),
                &[("X-Requested-With", "XMLHttpRequest")],
                &form,
                |page| {
                    CSRF_RE
                        .captures(page)
                        .map(|c| vec![("X-CSRF-TOKEN".to_string(), c[1].to_string())])
                        .unwrap_or_default()
                },
            )
            .await?;
        if !CSRF_RE.is_match(&session_body) {
            return Err(CrawlError::AntiBot("no _csrf meta on session page".into()));
        }
        Ok(body)
    }
}

#[async_trait]
impl SourceCrawler for TwayAirCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self
                .retry
                .run(
                    || self.fetch_fares(&req.origin, &req.destination, &req.currency),
                    CrawlError::is_retryable,
                )
                .await?;
            parse_lowest_fares(
                &body,
                &req.origin,
                &req.destination,
                req.cabin_class,
                &req.currency,
            )
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.fetch_fares("ICN", "NRT", "KRW").await.is_ok()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "tway_air"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(TwayAirCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_fares_parse_skipping_soldout_and_nonoperating() {
        let body = r#"{"OW": {
            "20260301": "20260301|ICN|NRT|N|N|Y|N|100000.0|138700.0|SmartFare",
            "20260302": "20260302|ICN|NRT|Y|N|Y|N|100000.0|138700.0|SmartFare",
            "20260303": "20260303|ICN|NRT|N|N|N|N|100000.0|138700.0|SmartFare",
            "20260304": ""
        }}"#;
        let flights =
            parse_lowest_fares(body, "ICN", "NRT", CabinClass::Economy, "KRW").unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "TW-ICNNRT");
        assert_eq!(f.prices[0].amount, 138700.0);
        assert_eq!(f.prices[0].fare_class.as_deref(), Some("SmartFare"));
    }

    #[test]
    fn csrf_meta_extraction() {
        let page = r#"<html><meta name="_csrf" content="abc-123"/></html>"#;
        assert_eq!(CSRF_RE.captures(page).unwrap()[1].to_string(), "abc-123");
    }
}
