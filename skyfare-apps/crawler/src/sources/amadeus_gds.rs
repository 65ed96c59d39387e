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

//! # Amadeus GDS Source
//!
//! Self-Service Flight Offers Search over OAuth2 `client_credentials`.
//! Tokens are cached in memory, refreshed 60 s before expiry, and
//! invalidated on an observed 401 before a single re-attempt. Offers fold
//! to one flight per outbound itinerary with `stops = segments - 1`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    SearchRequest,
};
use crate::sources::normalize::parse_iso8601_minutes;
use crate::transport::DirectClient;

fn cabin_param(cabin: CabinClass) -> &'static str {
    match cabin {
        CabinClass::Economy => "ECONOMY",
        CabinClass::PremiumEconomy => "PREMIUM_ECONOMY",
        CabinClass::Business => "BUSINESS",
        CabinClass::First => "FIRST",
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: String,
    expires_at: Option<std::time::Instant>,
}

impl TokenState {
    fn is_fresh(&self) -> bool {
        !self.access_token.is_empty()
            && self
                .expires_at
                .map(|at| std::time::Instant::now() < at)
                .unwrap_or(false)
    }
}

/// OAuth2 token cache. The mutex serializes concurrent refreshes so a burst
/// of crawls costs one grant, not N.
struct TokenManager {
    client: DirectClient,
    token_url: String,
    client_id: String,
    client_secret: String,
    state: Mutex<TokenState>,
}

impl TokenManager {
    fn new(client: DirectClient, hostname: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            client,
            token_url: format!("https://{hostname}/v1/security/oauth2/token"),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            state: Mutex::new(TokenState::default()),
        }
    }

    async fn token(&self) -> FetchResult<String> {
        let mut state = self.state.lock().await;
        if state.is_fresh() {
            return Ok(state.access_token.clone());
        }
        let body = self
            .client
            .post_form(
                &self.token_url,
                &[],
                &[
                    ("grant_type", "client_credentials".to_string()),
                    ("client_id", self.client_id.clone()),
                    ("client_secret", self.client_secret.clone()),
                ],
            )
            .await?;
        let parsed: TokenResponse = serde_json::from_str(&body)?;
        let expires_in = parsed.expires_in.unwrap_or(1799);
        state.access_token = parsed.access_token;
        // Refresh 60 s before actual expiry to avoid edge-case 401s.
        state.expires_at = Some(
            std::time::Instant::now() + Duration::from_secs(expires_in.saturating_sub(60)),
        );
        tracing::info!("Amadeus OAuth2 token acquired (expires_in={expires_in}s)");
        Ok(state.access_token.clone())
    }

    async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = TokenState::default();
    }
}

// Flight Offers Search response shapes (the slice we consume).
#[derive(Debug, Deserialize)]
struct OffersResponse {
    #[serde(default)]
    data: Vec<Offer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Offer {
    #[serde(default)]
    itineraries: Vec<OfferItinerary>,
    #[serde(default)]
    price: Option<OfferPrice>,
}

#[derive(Debug, Deserialize)]
struct OfferItinerary {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Segment {
    #[serde(default)]
    departure: Option<SegmentPoint>,
    #[serde(default)]
    arrival: Option<SegmentPoint>,
    #[serde(default)]
    carrier_code: Option<String>,
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    operating: Option<OperatingInfo>,
    #[serde(default)]
    aircraft: Option<AircraftInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentPoint {
    #[serde(default)]
    iata_code: Option<String>,
    #[serde(default)]
    at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperatingInfo {
    #[serde(default)]
    carrier_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AircraftInfo {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OfferPrice {
    #[serde(default)]
    total: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

fn parse_local_dt(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

/// One flight per offer's outbound itinerary.
pub(crate) fn parse_flight_offers(
    body: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: OffersResponse = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for offer in &parsed.data {
        let Some(itin) = offer.itineraries.first() else {
            continue;
        };
        let (Some(first_seg), Some(last_seg)) = (itin.segments.first(), itin.segments.last())
        else {
            continue;
        };

        let origin = first_seg
            .departure
            .as_ref()
            .and_then(|p| p.iata_code.as_deref())
            .unwrap_or_default()
            .to_ascii_uppercase();
        let destination = last_seg
            .arrival
            .as_ref()
            .and_then(|p| p.iata_code.as_deref())
            .unwrap_or_default()
            .to_ascii_uppercase();
        let dep_str = first_seg.departure.as_ref().and_then(|p| p.at.as_deref());
        let arr_str = last_seg.arrival.as_ref().and_then(|p| p.at.as_deref());
        let (Some(dep), Some(arr)) = (
            dep_str.and_then(parse_local_dt),
            arr_str.and_then(parse_local_dt),
        ) else {
            continue;
        };
        if origin.is_empty() || destination.is_empty() {
            continue;
        }

        let carrier = first_seg
            .carrier_code
            .as_deref()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let number = first_seg.number.as_deref().unwrap_or_default();
        if carrier.is_empty() || number.is_empty() {
            continue;
        }

        let duration_minutes = itin
            .duration
            .as_deref()
            .and_then(parse_iso8601_minutes)
            .unwrap_or_else(|| (arr - dep).num_minutes().max(0));

        let prices = offer
            .price
            .as_ref()
            .and_then(|p| {
                let amount: f64 = p.total.as_deref()?.parse().ok()?;
                if amount <= 0.0 {
                    return None;
                }
                Some(vec![NormalizedPrice::new(
                    amount,
                    p.currency.as_deref().unwrap_or("EUR"),
                    DataSource::Gds,
                    now,
                )])
            })
            .unwrap_or_default();

        flights.push(NormalizedFlight {
            flight_number: format!("{carrier}{number}"),
            airline_code: carrier.clone(),
            airline_name: None,
            operator: first_seg
                .operating
                .as_ref()
                .and_then(|o| o.carrier_code.clone())
                .unwrap_or_else(|| carrier.clone()),
            origin,
            destination,
            departure_time: dep,
            arrival_time: arr,
            duration_minutes,
            cabin_class,
            aircraft_type: first_seg.aircraft.as_ref().and_then(|a| a.code.clone()),
            stops: (itin.segments.len() as u32).saturating_sub(1),
            prices,
            source: DataSource::Gds,
            source_tags: vec![],
            crawled_at: now,
        });
    }
    Ok(flights)
}

pub struct AmadeusGdsCrawler {
    client: DirectClient,
    tokens: TokenManager,
    base_url: String,
    retry: RetryPolicy,
}

impl AmadeusGdsCrawler {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        if settings.amadeus_client_id.is_empty() || settings.amadeus_client_secret.is_empty() {
            anyhow::bail!(
                "CRAWLER_AMADEUS_CLIENT_ID and CRAWLER_AMADEUS_CLIENT_SECRET must be set"
            );
        }
        let client = DirectClient::new(settings.l1_timeout)?;
        let tokens = TokenManager::new(
            client.clone(),
            &settings.amadeus_hostname,
            &settings.amadeus_client_id,
            &settings.amadeus_client_secret,
        );
        Ok(Self {
            client,
            tokens,
            base_url: format!("https://{}", settings.amadeus_hostname),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        })
    }

    async fn offers_once(&self, query: &[(&str, String)]) -> FetchResult<String> {
        let token = self.tokens.token().await?;
        let url = format!("{}/v2/shopping/flight-offers", self.base_url);
        let auth = format!("Bearer {token}");
        let headers = [("Authorization", auth.as_str()), ("Accept", "application/json")];
        match self.client.get(&url, &headers, query).await {
            Err(CrawlError::AuthExpired) => {
                // One refresh-and-retry before the error counts as a retry.
                self.tokens.invalidate().await;
                let token = self.tokens.token().await?;
                let auth = format!("Bearer {token}");
                let headers =
                    [("Authorization", auth.as_str()), ("Accept", "application/json")];
                self.client.get(&url, &headers, query).await
            }
            other => other,
        }
    }

    fn offers_query(req: &SearchRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("originLocationCode", req.origin.clone()),
            ("destinationLocationCode", req.destination.clone()),
            ("departureDate", req.departure_date.format("%Y-%m-%d").to_string()),
            ("adults", req.passengers.adults.to_string()),
            ("travelClass", cabin_param(req.cabin_class).to_string()),
            ("currencyCode", req.currency.clone()),
            ("max", "50".to_string()),
        ];
        if req.passengers.children > 0 {
            query.push(("children", req.passengers.children.to_string()));
        }
        if req.passengers.infants() > 0 {
            query.push(("infants", req.passengers.infants().to_string()));
        }
        if let Some(ret) = req.return_date {
            query.push(("returnDate", ret.format("%Y-%m-%d").to_string()));
        }
        query
    }
}

#[async_trait]
impl SourceCrawler for AmadeusGdsCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let query = Self::offers_query(req);
            let body = self
                .retry
                .run(|| self.offers_once(&query), CrawlError::is_retryable)
                .await?;
            parse_flight_offers(&body, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        // Credentials valid == token grant succeeds.
        self.tokens.token().await.is_ok()
    }

    async fn close(&self) {
        self.tokens.invalidate().await;
    }

    fn declared_source(&self) -> DataSource {
        DataSource::Gds
    }

    fn name(&self) -> &'static str {
        "amadeus_gds"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(AmadeusGdsCrawler::new(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "data": [{
            "itineraries": [{
                "duration": "PT7H25M",
                "segments": [
                    {
                        "departure": {"iataCode": "ICN", "at": "2026-03-15T10:30:00"},
                        "arrival": {"iataCode": "BKK", "at": "2026-03-15T14:20:00"},
                        "carrierCode": "TG", "number": "659",
                        "operating": {"carrierCode": "TG"},
                        "aircraft": {"code": "77W"}
                    },
                    {
                        "departure": {"iataCode": "BKK", "at": "2026-03-15T16:00:00"},
                        "arrival": {"iataCode": "SIN", "at": "2026-03-15T19:25:00"},
                        "carrierCode": "TG", "number": "403"
                    }
                ]
            }],
            "price": {"total": "412.50", "currency": "USD"}
        }]
    }"#;

    #[test]
    fn offers_collapse_to_one_flight_per_itinerary() {
        let flights = parse_flight_offers(SAMPLE, CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "TG659");
        assert_eq!(f.origin, "ICN");
        assert_eq!(f.destination, "SIN");
        assert_eq!(f.stops, 1);
        assert_eq!(f.duration_minutes, 445);
        assert_eq!(f.aircraft_type.as_deref(), Some("77W"));
        assert_eq!(f.prices[0].amount, 412.5);
        assert_eq!(f.prices[0].currency, "USD");
    }
}
