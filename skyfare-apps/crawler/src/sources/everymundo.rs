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

//! # EveryMundo Sputnik Fare Client
//!
//! Several carriers (JL, NZ, ET, AF/KL, TG) publish daily lowest fares
//! through EveryMundo's airTrfx platform. The `airfare-sputnik-service`
//! endpoint is shared; only the tenant path segment, the page the public
//! API key is embedded in, and the airline identity differ. This module
//! holds the shared client and parser; per-carrier modules supply a
//! [`SputnikTenant`] and register the resulting crawler.
//!
//! The endpoint returns fares across the whole route network ranked by
//! price; the `origin`/`destination` body fields only influence ranking,
//! so route filtering happens here after parsing.

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

const FARE_SEARCH_BASE: &str =
    "https://openair-california.airtrfx.com/airfare-sputnik-service/v3";

/// Public EM API key shared across EveryMundo airline tenants, embedded in
/// each tenant's public flights page.
const EM_API_KEY: &str = "HeQpRjsFI5xlAaSx2onkjc1HTK0ukqA1IrVvd5fvaMhNtzLTxInTpeYB1MK93pah";

const DAYS_INTERVAL_MIN: u32 = 1;
const DAYS_INTERVAL_MAX: u32 = 300;
const ROUTES_LIMIT: u32 = 100;
const FARES_LIMIT: u32 = 500;
const FARES_PER_ROUTE: u32 = 5;

/// Identity of one airTrfx tenant.
pub struct SputnikTenant {
    /// Path segment, e.g. `"jl"`.
    pub tenant: &'static str,
    pub airline_code: &'static str,
    pub airline_name: &'static str,
    /// Flights page the API key is served from; required by CORS policy.
    pub referer: &'static str,
    pub origin_header: &'static str,
}

// Envelope shapes. A schema regression fails the parse loudly instead of
// yielding a silent empty result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FareEntry {
    #[serde(default)]
    departure_date: Option<String>,
    #[serde(default)]
    outbound_flight: Option<OutboundFlight>,
    #[serde(default)]
    price_specification: Option<PriceSpecification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutboundFlight {
    #[serde(default)]
    departure_airport_iata_code: Option<String>,
    #[serde(default)]
    arrival_airport_iata_code: Option<String>,
    #[serde(default)]
    fare_class: Option<String>,
    #[serde(default)]
    fare_class_input: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceSpecification {
    #[serde(default)]
    total_price: Option<f64>,
    #[serde(default)]
    currency_code: Option<String>,
    #[serde(default)]
    sold_out: Option<bool>,
}

fn map_cabin(fare_class: &str) -> Option<CabinClass> {
    match fare_class.to_ascii_uppercase().as_str() {
        "ECONOMY" => Some(CabinClass::Economy),
        "PREMIUM_ECONOMY" | "PREMIUMECONOMY" => Some(CabinClass::PremiumEconomy),
        "BUSINESS" => Some(CabinClass::Business),
        "FIRST" => Some(CabinClass::First),
        _ => None,
    }
}

/// Convert Sputnik fare entries into synthetic per-day lowest-fare rows
/// (`duration = 0`, `arrival = departure`) for the requested route.
pub fn parse_fares(
    body: &str,
    tenant: &SputnikTenant,
    origin_filter: &str,
    destination_filter: &str,
    cabin_default: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let entries: Vec<FareEntry> = serde_json::from_str(body)?;
    let now = Utc::now();
    let mut flights = Vec::new();

    for entry in &entries {
        let Some(price_spec) = &entry.price_specification else {
            continue;
        };
        let amount = price_spec.total_price.unwrap_or(0.0);
        if amount <= 0.0 || price_spec.sold_out.unwrap_or(false) {
            continue;
        }
        let currency = price_spec.currency_code.as_deref().unwrap_or("KRW");

        let Some(outbound) = &entry.outbound_flight else {
            continue;
        };
        let (Some(dep_airport), Some(arr_airport)) = (
            outbound.departure_airport_iata_code.as_deref(),
            outbound.arrival_airport_iata_code.as_deref(),
        ) else {
            continue;
        };
        let dep_airport = dep_airport.to_ascii_uppercase();
        let arr_airport = arr_airport.to_ascii_uppercase();
        if dep_airport != origin_filter || arr_airport != destination_filter {
            continue;
        }

        let Some(date_str) = entry.departure_date.as_deref() else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            tracing::warn!("{}: invalid Sputnik fare date {date_str}", tenant.airline_code);
            continue;
        };
        let dep_dt = date.and_hms_opt(0, 0, 0).unwrap().and_utc();

        let cabin = outbound
            .fare_class
            .as_deref()
            .and_then(map_cabin)
            .unwrap_or(cabin_default);
        let fare_label = match (
            outbound.fare_class.as_deref(),
            outbound.fare_class_input.as_deref(),
        ) {
            (Some(class), Some(input)) => format!("{}-{input}", class.to_ascii_lowercase()),
            (Some(class), None) => class.to_ascii_lowercase(),
            _ => "lowest".to_string(),
        };

        let mut price = NormalizedPrice::new(amount, currency, DataSource::DirectCrawl, now);
        price.fare_class = Some(fare_label);

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number(
                tenant.airline_code,
                &dep_airport,
                &arr_airport,
            ),
            airline_code: tenant.airline_code.to_string(),
            airline_name: Some(tenant.airline_name.to_string()),
            operator: tenant.airline_code.to_string(),
            origin: dep_airport,
            destination: arr_airport,
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

    tracing::info!(
        "Parsed {} daily lowest fares for {origin_filter}->{destination_filter} from {}",
        flights.len(),
        tenant.airline_name
    );
    Ok(flights)
}

/// Crawler over one Sputnik tenant.
pub struct SputnikCrawler {
    name: &'static str,
    tenant: &'static SputnikTenant,
    http: ImpersonateClient,
    retry: RetryPolicy,
}

impl SputnikCrawler {
    pub fn new(name: &'static str, tenant: &'static SputnikTenant, settings: &Settings) -> Self {
        Self {
            name,
            tenant,
            http: ImpersonateClient::new(settings.l2_timeout),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }

    fn search_url(&self) -> String {
        format!("{FARE_SEARCH_BASE}/{}/fares/search", self.tenant.tenant)
    }

    async fn fetch_fares(
        &self,
        origin: Option<&str>,
        destination: Option<&str>,
        currency: &str,
    ) -> FetchResult<String> {
        let mut body = serde_json::json!({
            "currency": currency,
            "departureDaysInterval": {"min": DAYS_INTERVAL_MIN, "max": DAYS_INTERVAL_MAX},
            "routesLimit": ROUTES_LIMIT,
            "faresLimit": FARES_LIMIT,
            "faresPerRoute": FARES_PER_ROUTE,
        });
        if let Some(origin) = origin {
            body["origin"] = serde_json::json!(origin);
        }
        if let Some(destination) = destination {
            body["destination"] = serde_json::json!(destination);
        }

        let url = self.search_url();
        let headers = [
            ("em-api-key", EM_API_KEY),
            ("Accept", "application/json"),
            ("Referer", self.tenant.referer),
            ("Origin", self.tenant.origin_header),
        ];
        self.retry
            .run(
                || self.http.post_json(&url, &headers, &body, &[]),
                CrawlError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl SourceCrawler for SputnikCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name, async {
            let body = self
                .fetch_fares(Some(&req.origin), Some(&req.destination), &req.currency)
                .await?;
            parse_fares(
                &body,
                self.tenant,
                &req.origin,
                &req.destination,
                req.cabin_class,
            )
        })
        .await
    }

    async fn health_check(&self) -> bool {
        match self.fetch_fares(None, None, "USD").await {
            Ok(body) => serde_json::from_str::<Vec<FareEntry>>(&body)
                .map(|entries| !entries.is_empty())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TENANT: SputnikTenant = SputnikTenant {
        tenant: "jl",
        airline_code: "JL",
        airline_name: "Japan Airlines",
        referer: "https://www.jal.co.jp/jp/en/",
        origin_header: "https://www.jal.co.jp",
    };

    const SAMPLE: &str = r#"[
        {
            "airline": {"iataCode": "JL"},
            "departureDate": "2026-04-15",
            "flightType": "INTERNATIONAL",
            "journeyType": "ONE_WAY",
            "outboundFlight": {
                "departureAirportIataCode": "NRT",
                "arrivalAirportIataCode": "ICN",
                "fareClass": "ECONOMY",
                "fareClassInput": "seat"
            },
            "priceSpecification": {
                "totalPrice": 150000.0,
                "currencyCode": "KRW",
                "soldOut": false
            }
        },
        {
            "departureDate": "2026-04-16",
            "outboundFlight": {
                "departureAirportIataCode": "NRT",
                "arrivalAirportIataCode": "ICN",
                "fareClass": "ECONOMY"
            },
            "priceSpecification": {
                "totalPrice": 0,
                "currencyCode": "KRW"
            }
        },
        {
            "departureDate": "2026-04-17",
            "outboundFlight": {
                "departureAirportIataCode": "HND",
                "arrivalAirportIataCode": "ICN",
                "fareClass": "BUSINESS"
            },
            "priceSpecification": {
                "totalPrice": 420000.0,
                "currencyCode": "KRW",
                "soldOut": false
            }
        }
    ]"#;

    #[test]
    fn parses_route_filtered_synthetic_rows() {
        let flights =
            parse_fares(SAMPLE, &TEST_TENANT, "NRT", "ICN", CabinClass::Economy).unwrap();
        // Zero-price entry dropped; HND row filtered out by route.
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "JL-NRTICN");
        assert!(f.is_synthetic());
        assert_eq!(f.duration_minutes, 0);
        assert_eq!(f.prices.len(), 1);
        assert_eq!(f.prices[0].amount, 150000.0);
        assert_eq!(f.prices[0].fare_class.as_deref(), Some("economy-seat"));
    }

    #[test]
    fn malformed_body_is_a_shape_error() {
        let err =
            parse_fares("{\"not\": \"a list\"}", &TEST_TENANT, "NRT", "ICN", CabinClass::Economy)
                .unwrap_err();
        assert!(matches!(err, CrawlError::ResponseShape(_)));
    }
}
