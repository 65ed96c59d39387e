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

//! # Lufthansa Group Source
//!
//! Open API flight schedules for LH, LX, OS, 4U, SN, EN, WK, and 4Y via
//! OAuth2 `client_credentials`. Schedule data only: flights come back with
//! empty price lists. Times are SSIM-style minutes-from-midnight UTC with a
//! day offset.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight};
use crate::transport::DirectClient;

/// Lufthansa Group airline IATA codes served by this API.
pub const LH_GROUP_AIRLINES: &[&str] = &["LH", "LX", "OS", "4U", "SN", "EN", "WK", "4Y"];

fn airline_name(code: &str) -> Option<&'static str> {
    match code {
        "LH" => Some("Lufthansa"),
        "LX" => Some("Swiss International Air Lines"),
        "OS" => Some("Austrian Airlines"),
        "4U" => Some("Eurowings"),
        "SN" => Some("Brussels Airlines"),
        "EN" => Some("Air Dolomiti"),
        "WK" => Some("Edelweiss Air"),
        "4Y" => Some("Eurowings Discover"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Schedule {
    #[serde(default)]
    airline: Option<String>,
    #[serde(default)]
    flight_number: Option<u32>,
    #[serde(default)]
    suffix: Option<String>,
    #[serde(default)]
    legs: Vec<ScheduleLeg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleLeg {
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default, rename = "aircraftDepartureTimeUTC")]
    aircraft_departure_time_utc: Option<i64>,
    #[serde(default, rename = "aircraftDepartureTimeDateDiffUTC")]
    aircraft_departure_time_date_diff_utc: Option<i64>,
    #[serde(default, rename = "aircraftArrivalTimeUTC")]
    aircraft_arrival_time_utc: Option<i64>,
    #[serde(default, rename = "aircraftArrivalTimeDateDiffUTC")]
    aircraft_arrival_time_date_diff_utc: Option<i64>,
    #[serde(default)]
    aircraft_type: Option<String>,
    #[serde(default)]
    op: Option<OperatingFlag>,
}

#[derive(Debug, Deserialize)]
struct OperatingFlag {
    #[serde(default)]
    operating: Option<bool>,
}

fn minutes_to_time(
    base_date: NaiveDate,
    minutes_from_midnight: i64,
    date_diff: i64,
) -> chrono::DateTime<Utc> {
    base_date.and_hms_opt(0, 0, 0).unwrap().and_utc()
        + chrono::Duration::days(date_diff)
        + chrono::Duration::minutes(minutes_from_midnight)
}

/// Schedules carry no fares: flights come back priceless.
pub(crate) fn parse_flight_schedules(
    body: &str,
    departure_date: NaiveDate,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    // Envelope: {"ScheduleResource": {"Schedule": [...]}} — or a bare list,
    // which the API emits for single-page responses.
    #[derive(Debug, Deserialize)]
    struct Envelope {
        #[serde(rename = "ScheduleResource")]
        schedule_resource: Option<ScheduleResource>,
    }
    #[derive(Debug, Deserialize)]
    struct ScheduleResource {
        #[serde(rename = "Schedule", default)]
        schedule: Vec<Schedule>,
    }

    let schedules: Vec<Schedule> = if let Ok(env) = serde_json::from_str::<Envelope>(body) {
        env.schedule_resource.map(|r| r.schedule).unwrap_or_default()
    } else {
        serde_json::from_str(body)?
    };

    let now = Utc::now();
    let mut flights = Vec::new();

    for sched in &schedules {
        let airline_code = sched
            .airline
            .as_deref()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if airline_code.is_empty() {
            continue;
        }
        let (Some(first_leg), Some(last_leg)) = (sched.legs.first(), sched.legs.last()) else {
            continue;
        };
        let (Some(origin), Some(destination)) =
            (first_leg.origin.as_deref(), last_leg.destination.as_deref())
        else {
            continue;
        };

        let departure_time = minutes_to_time(
            departure_date,
            first_leg.aircraft_departure_time_utc.unwrap_or(0),
            first_leg.aircraft_departure_time_date_diff_utc.unwrap_or(0),
        );
        let arrival_time = minutes_to_time(
            departure_date,
            last_leg.aircraft_arrival_time_utc.unwrap_or(0),
            last_leg.aircraft_arrival_time_date_diff_utc.unwrap_or(0),
        );

        // Marketing-only schedules don't name the operating group carrier
        // at this level; keep the marketing code either way.
        let is_operating = first_leg
            .op
            .as_ref()
            .and_then(|o| o.operating)
            .unwrap_or(true);
        if !is_operating {
            tracing::debug!("{airline_code}: marketing-only schedule entry");
        }
        let operator = airline_code.clone();

        flights.push(NormalizedFlight {
            flight_number: format!(
                "{airline_code}{}{}",
                sched.flight_number.unwrap_or(0),
                sched.suffix.as_deref().unwrap_or("")
            ),
            airline_code: airline_code.clone(),
            airline_name: airline_name(&airline_code).map(str::to_string),
            operator,
            origin: origin.to_ascii_uppercase(),
            destination: destination.to_ascii_uppercase(),
            departure_time,
            arrival_time,
            duration_minutes: (arrival_time - departure_time).num_minutes().max(0),
            cabin_class,
            aircraft_type: first_leg.aircraft_type.clone(),
            stops: (sched.legs.len() as u32).saturating_sub(1),
            prices: Vec::new(),
            source: DataSource::OfficialApi,
            source_tags: vec![],
            crawled_at: now,
        });
    }
    Ok(flights)
}

pub struct LufthansaGroupCrawler {
    client: DirectClient,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<(String, Option<std::time::Instant>)>,
    retry: RetryPolicy,
}

impl LufthansaGroupCrawler {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        if settings.lufthansa_client_id.is_empty() || settings.lufthansa_client_secret.is_empty() {
            anyhow::bail!(
                "CRAWLER_LUFTHANSA_CLIENT_ID and CRAWLER_LUFTHANSA_CLIENT_SECRET must be set"
            );
        }
        Ok(Self {
            client: DirectClient::new(settings.l1_timeout)?,
            base_url: format!("https://{}", settings.lufthansa_hostname),
            client_id: settings.lufthansa_client_id.clone(),
            client_secret: settings.lufthansa_client_secret.clone(),
            token: Mutex::new((String::new(), None)),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        })
    }

    async fn ensure_token(&self) -> FetchResult<String> {
        let mut guard = self.token.lock().await;
        let fresh = !guard.0.is_empty()
            && guard
                .1
                .map(|at| std::time::Instant::now() < at)
                .unwrap_or(false);
        if fresh {
            return Ok(guard.0.clone());
        }
        let body = self
            .client
            .post_form(
                &format!("{}/v1/oauth/token", self.base_url),
                &[("Content-Type", "application/x-www-form-urlencoded")],
                &[
                    ("client_id", self.client_id.clone()),
                    ("client_secret", self.client_secret.clone()),
                    ("grant_type", "client_credentials".to_string()),
                ],
            )
            .await?;
        let parsed: TokenResponse = serde_json::from_str(&body)?;
        let expires_in = parsed.expires_in.unwrap_or(21600);
        guard.0 = parsed.access_token.clone();
        // Refresh 60 s before actual expiry to avoid edge-case 401s.
        guard.1 = Some(
            std::time::Instant::now() + Duration::from_secs(expires_in.saturating_sub(60)),
        );
        tracing::info!("Lufthansa OAuth2 token acquired (expires_in={expires_in}s)");
        Ok(parsed.access_token)
    }

    async fn invalidate_token(&self) {
        let mut guard = self.token.lock().await;
        *guard = (String::new(), None);
    }

    async fn get_schedules(&self, origin: &str, destination: &str, date: NaiveDate) -> FetchResult<String> {
        let url = format!(
            "{}/v1/operations/schedules/{origin}/{destination}/{}",
            self.base_url,
            date.format("%Y-%m-%d")
        );
        let query = [("directFlights", "0".to_string())];

        let token = self.ensure_token().await?;
        let auth = format!("Bearer {token}");
        let headers = [("Authorization", auth.as_str()), ("Accept", "application/json")];
        match self.client.get(&url, &headers, &query).await {
            Err(CrawlError::AuthExpired) => {
                tracing::warn!("Lufthansa token expired, refreshing...");
                self.invalidate_token().await;
                let token = self.ensure_token().await?;
                let auth = format!("Bearer {token}");
                let headers =
                    [("Authorization", auth.as_str()), ("Accept", "application/json")];
                self.client.get(&url, &headers, &query).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl SourceCrawler for LufthansaGroupCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self
                .retry
                .run(
                    || self.get_schedules(&req.origin, &req.destination, req.departure_date),
                    CrawlError::is_retryable,
                )
                .await?;
            parse_flight_schedules(&body, req.departure_date, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.ensure_token().await.is_ok()
    }

    async fn close(&self) {
        self.invalidate_token().await;
    }

    fn declared_source(&self) -> DataSource {
        DataSource::OfficialApi
    }

    fn name(&self) -> &'static str {
        "lufthansa_group"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(LufthansaGroupCrawler::new(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "ScheduleResource": {
            "Schedule": [{
                "airline": "LH",
                "flightNumber": 712,
                "legs": [{
                    "origin": "ICN",
                    "destination": "FRA",
                    "aircraftDepartureTimeUTC": 590,
                    "aircraftDepartureTimeDateDiffUTC": 0,
                    "aircraftArrivalTimeUTC": 1335,
                    "aircraftArrivalTimeDateDiffUTC": 0,
                    "aircraftType": "747"
                }]
            }]
        }
    }"#;

    #[test]
    fn schedules_parse_without_prices() {
        let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let flights = parse_flight_schedules(SAMPLE, date, CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "LH712");
        assert_eq!(f.airline_name.as_deref(), Some("Lufthansa"));
        assert!(f.prices.is_empty());
        assert_eq!(f.duration_minutes, 745);
        assert_eq!(f.departure_time.format("%H:%M").to_string(), "09:50");
        assert_eq!(f.source, DataSource::OfficialApi);
    }
}
