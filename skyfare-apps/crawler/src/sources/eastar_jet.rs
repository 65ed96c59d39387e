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

//! # Eastar Jet Source
//!
//! dotRez (Navitaire) booking engine on `kraken.eastarjet.com`. Every call
//! needs an anonymous session from `/passport/v1/session/create`, carried
//! as `JSESSIONID` + URL-encoded `USER_STATE` cookies. A 401 invalidates
//! the session so the retry creates a fresh one.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    synthetic_flight_number,
};
use crate::transport::ImpersonateClient;

const BASE_URL: &str = "https://kraken.eastarjet.com";
const ORIGIN_HEADER: &str = "https://main.eastarjet.com";

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    #[serde(default)]
    data: Option<SessionData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    #[serde(default, rename = "sessionXsessionId")]
    session_xsession_id: Option<String>,
    #[serde(default)]
    jsession_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyLowFareEnvelope {
    #[serde(default)]
    data: Option<DailyLowFareData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyLowFareData {
    #[serde(default)]
    currency_code: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    low_fare_amounts: Vec<LowFareAmount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LowFareAmount {
    #[serde(default)]
    total_price: Option<f64>,
    #[serde(default)]
    dept_date: Option<String>,
}

fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
        })
}

pub(crate) fn parse_daily_low_fares(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: DailyLowFareEnvelope = serde_json::from_str(body)?;
    let Some(data) = parsed.data else {
        return Ok(Vec::new());
    };
    let currency = data.currency_code.as_deref().unwrap_or("KRW");
    let api_origin = data
        .origin
        .as_deref()
        .unwrap_or(origin)
        .to_ascii_uppercase();
    let api_dest = data
        .destination
        .as_deref()
        .unwrap_or(destination)
        .to_ascii_uppercase();

    let now = Utc::now();
    let mut flights = Vec::new();

    for entry in &data.low_fare_amounts {
        let Some(total) = entry.total_price.filter(|p| *p > 0.0) else {
            continue;
        };
        let Some(dep_dt) = entry.dept_date.as_deref().and_then(parse_iso_date) else {
            tracing::warn!("Invalid departure date: {:?}", entry.dept_date);
            continue;
        };

        let mut price = NormalizedPrice::new(total, currency, DataSource::DirectCrawl, now);
        price.fare_class = Some("lowest".to_string());

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number("ZE", &api_origin, &api_dest),
            airline_code: "ZE".to_string(),
            airline_name: Some("Eastar Jet".to_string()),
            operator: "ZE".to_string(),
            origin: api_origin.clone(),
            destination: api_dest.clone(),
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

#[derive(Debug, Default, Clone)]
struct Session {
    token: String,
    jsession_id: String,
}

impl Session {
    fn cookie_header(&self) -> String {
        let token_encoded = urlencoding::encode(&format!("JTI={}", self.token)).into_owned();
        format!("JSESSIONID={}; USER_STATE={token_encoded}", self.jsession_id)
    }
}

pub struct EastarJetCrawler {
    http: ImpersonateClient,
    session: Mutex<Option<Session>>,
    retry: RetryPolicy,
}

impl EastarJetCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            session: Mutex::new(None),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    async fn ensure_session(&self) -> FetchResult<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let body = self
            .http
            .get(
                &format!("{BASE_URL}/passport/v1/session/create"),
                &[("Origin", ORIGIN_HEADER)],
                &[],
            )
            .await?;
        let parsed: SessionEnvelope = serde_json::from_str(&body)?;
        let data = parsed
            .data
            .ok_or_else(|| CrawlError::shape("session create: missing data"))?;
        let session = Session {
            token: data
                .session_xsession_id
                .ok_or_else(|| CrawlError::shape("session create: missing token"))?,
            jsession_id: data
                .jsession_id
                .ok_or_else(|| CrawlError::shape("session create: missing jsessionId"))?,
        };
        tracing::debug!("Eastar Jet session created: JSESSIONID={}", session.jsession_id);
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn invalidate_session(&self) {
        *self.session.lock().await = None;
    }

    async fn daily_low_fares(
        &self,
        origin: &str,
        destination: &str,
        begin_date: &str,
        end_date: &str,
        currency: &str,
    ) -> FetchResult<String> {
        let session = self.ensure_session().await?;
        let cookie = session.cookie_header();
        let body = json!({
            "origin": origin,
            "destination": destination,
            "beginDate": begin_date,
            "endDate": end_date,
            "currencyCode": currency,
        });
        let headers = [("Cookie", cookie.as_str()), ("Origin", ORIGIN_HEADER)];
        let result = self
            .http
            .post_json(
                &format!("{BASE_URL}/availability/v1/dailyLowFare"),
                &headers,
                &body,
                &[],
            )
            .await;
        if matches!(result, Err(CrawlError::AuthExpired)) {
            // Stale dotRez session; next attempt re-creates it.
            self.invalidate_session().await;
        }
        result
    }
}

#[async_trait]
impl SourceCrawler for EastarJetCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let begin = req.departure_date.format("%Y-%m-%d").to_string();
            let end = (req.departure_date + chrono::Duration::days(30))
                .format("%Y-%m-%d")
                .to_string();
            let body = self
                .retry
                .run(
                    || {
                        self.daily_low_fares(
                            &req.origin,
                            &req.destination,
                            &begin,
                            &end,
                            &req.currency,
                        )
                    },
                    CrawlError::is_retryable,
                )
                .await?;
            parse_daily_low_fares(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.ensure_session().await.is_ok()
    }

    async fn close(&self) {
        self.invalidate_session().await;
    }

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "eastar_jet"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(EastarJetCrawler::new(settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_fares_parse_to_synthetic_rows() {
        let body = r#"{
            "data": {
                "currencyCode": "KRW",
                "origin": "ICN",
                "destination": "NRT",
                "lowFareAmounts": [
                    {"totalPrice": 132000.0, "deptDate": "2026-03-01T00:00:00"},
                    {"totalPrice": 0, "deptDate": "2026-03-02T00:00:00"}
                ]
            }
        }"#;
        let flights = parse_daily_low_fares(body, "ICN", "NRT", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].flight_number, "ZE-ICNNRT");
        assert!(flights[0].is_synthetic());
    }
}
