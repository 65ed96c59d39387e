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

//! # Turkish Airlines Source
//!
//! Three layers, tried in order:
//!
//! 1. The partner API on `api.turkishairlines.com` (key + secret headers),
//!    when enabled by configuration.
//! 2. The website's `availability/flight-matrix` API with the SPA's custom
//!    headers (`x-platform`, UUID `x-clientid`, `x-bfp`). Akamai
//!    intermittently rejects POSTs with `Error-DS-30037`; that marker
//!    surfaces as an anti-bot error so the retry re-warms.
//! 3. Browser automation over the booking SPA, intercepting the same
//!    flight-matrix responses the page fetches for itself — all three
//!    layers share one parser.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use skyfare_query_queues::RetryPolicy;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Settings;
use crate::contract::{FallbackCrawler, SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    SearchRequest,
};
use crate::sources::normalize::parse_iso8601_minutes;
use crate::transport::{BrowserFlow, BrowserSession, FlowStep, ImpersonateClient};

const WEB_BASE: &str = "https://www.turkishairlines.com";
const API_BASE: &str = "https://api.turkishairlines.com";

// ---------------------------------------------------------------------------
// Shared flight-matrix parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MatrixEnvelope {
    #[serde(default)]
    data: Option<MatrixData>,
    #[serde(default)]
    message: Option<MatrixMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixMessage {
    #[serde(default)]
    detail: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixData {
    #[serde(default)]
    origin_destination_information_list: Vec<OriginDestinationInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OriginDestinationInfo {
    #[serde(default)]
    origin_destination_option_list: Vec<OdOption>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OdOption {
    #[serde(default)]
    segment_list: Vec<MatrixSegment>,
    #[serde(default)]
    fare_category: Option<BTreeMap<String, FareCategory>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixSegment {
    #[serde(default)]
    departure_airport_code: Option<String>,
    #[serde(default)]
    arrival_airport_code: Option<String>,
    #[serde(default)]
    departure_date_time: Option<String>,
    #[serde(default)]
    arrival_date_time: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    marketing_airline_code: Option<String>,
    #[serde(default)]
    marketing_flight_number: Option<String>,
    #[serde(default)]
    operating_airline_code: Option<String>,
    #[serde(default)]
    equipment_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FareCategory {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    starting_price: Option<MatrixPrice>,
    #[serde(default)]
    brand_list: Vec<Brand>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Brand {
    #[serde(default)]
    brand_code: Option<String>,
    #[serde(default)]
    brand_name: Option<String>,
    #[serde(default)]
    price: Option<MatrixPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixPrice {
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    currency_code: Option<String>,
}

fn cabin_of_category(category: &str, fallback: CabinClass) -> CabinClass {
    match category.to_ascii_uppercase().as_str() {
        "ECONOMY" => CabinClass::Economy,
        "BUSINESS" => CabinClass::Business,
        "FIRST" => CabinClass::First,
        _ => fallback,
    }
}

fn parse_matrix_dt(s: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

pub(crate) fn parse_flight_matrix(
    body: &str,
    cabin_fallback: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    if body.contains("DS-30037") {
        return Err(CrawlError::AntiBot("Error-DS-30037 sensor rejection".into()));
    }
    let parsed: MatrixEnvelope = serde_json::from_str(body)?;
    if let Some(message) = &parsed.message {
        if let Some(code) = message.code.as_deref() {
            if !code.is_empty() && parsed.data.is_none() {
                return Err(CrawlError::UpstreamAdvisory(format!(
                    "TK flight-matrix {code}: {:?}",
                    message.detail
                )));
            }
        }
    }
    let Some(data) = parsed.data else {
        return Ok(Vec::new());
    };

    let now = Utc::now();
    let mut flights = Vec::new();

    for od_info in &data.origin_destination_information_list {
        for option in &od_info.origin_destination_option_list {
            let (Some(first_seg), Some(last_seg)) =
                (option.segment_list.first(), option.segment_list.last())
            else {
                continue;
            };
            let (Some(dep), Some(arr)) = (
                first_seg
                    .departure_date_time
                    .as_deref()
                    .and_then(parse_matrix_dt),
                last_seg.arrival_date_time.as_deref().and_then(parse_matrix_dt),
            ) else {
                continue;
            };
            let airline = first_seg
                .marketing_airline_code
                .as_deref()
                .unwrap_or("TK")
                .to_ascii_uppercase();
            let Some(number) = first_seg.marketing_flight_number.as_deref() else {
                continue;
            };

            // One price per available fare brand, per category.
            let mut prices = Vec::new();
            let mut option_cabin = cabin_fallback;
            if let Some(categories) = &option.fare_category {
                for (category_name, category) in categories {
                    if category
                        .status
                        .as_deref()
                        .map(|s| !s.eq_ignore_ascii_case("AVAILABLE"))
                        .unwrap_or(false)
                    {
                        continue;
                    }
                    let cabin = cabin_of_category(category_name, cabin_fallback);
                    if category_name.eq_ignore_ascii_case("ECONOMY") {
                        option_cabin = cabin;
                    }
                    let mut pushed = false;
                    for brand in &category.brand_list {
                        let Some(amount) = brand
                            .price
                            .as_ref()
                            .and_then(|p| p.amount)
                            .filter(|a| *a > 0.0)
                        else {
                            continue;
                        };
                        let currency = brand
                            .price
                            .as_ref()
                            .and_then(|p| p.currency_code.as_deref())
                            .unwrap_or("USD");
                        let mut price =
                            NormalizedPrice::new(amount, currency, DataSource::DirectCrawl, now);
                        price.fare_class = Some(format!(
                            "{category_name}/{}",
                            brand
                                .brand_name
                                .as_deref()
                                .or(brand.brand_code.as_deref())
                                .unwrap_or("base")
                        ));
                        prices.push(price);
                        pushed = true;
                    }
                    if !pushed {
                        if let Some(amount) = category
                            .starting_price
                            .as_ref()
                            .and_then(|p| p.amount)
                            .filter(|a| *a > 0.0)
                        {
                            let currency = category
                                .starting_price
                                .as_ref()
                                .and_then(|p| p.currency_code.as_deref())
                                .unwrap_or("USD");
                            let mut price = NormalizedPrice::new(
                                amount,
                                currency,
                                DataSource::DirectCrawl,
                                now,
                            );
                            price.fare_class = Some(category_name.clone());
                            prices.push(price);
                        }
                    }
                }
            }

            let duration_minutes = first_seg
                .duration
                .as_deref()
                .and_then(parse_iso8601_minutes)
                .unwrap_or_else(|| (arr - dep).num_minutes().max(0));

            flights.push(NormalizedFlight {
                flight_number: format!("{airline}{number}"),
                airline_code: airline.clone(),
                airline_name: Some("Turkish Airlines".to_string()),
                operator: first_seg
                    .operating_airline_code
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .unwrap_or(&airline)
                    .to_string(),
                origin: first_seg
                    .departure_airport_code
                    .as_deref()
                    .unwrap_or_default()
                    .to_ascii_uppercase(),
                destination: last_seg
                    .arrival_airport_code
                    .as_deref()
                    .unwrap_or_default()
                    .to_ascii_uppercase(),
                departure_time: dep,
                arrival_time: arr,
                duration_minutes,
                cabin_class: option_cabin,
                aircraft_type: first_seg.equipment_code.clone(),
                stops: (option.segment_list.len() as u32).saturating_sub(1),
                prices,
                source: DataSource::DirectCrawl,
                source_tags: vec![],
                crawled_at: now,
            });
        }
    }
    Ok(flights)
}

fn matrix_request_body(req: &SearchRequest) -> serde_json::Value {
    json!({
        "moduleType": "TICKETING",
        "originDestinationInformationList": [{
            "origin": {"airportCode": req.origin},
            "destination": {"airportCode": req.destination},
            "departureDate": req.departure_date.format("%Y-%m-%d").to_string(),
        }],
        "passengerTypeList": [
            {"quantity": req.passengers.adults, "code": "ADULT"},
        ],
        "cabinClass": req.cabin_class.as_str_name(),
    })
}

// ---------------------------------------------------------------------------
// Layer 1: partner API
// ---------------------------------------------------------------------------

pub struct TurkishOfficialApiCrawler {
    http: ImpersonateClient,
    api_key: String,
    api_secret: String,
    retry: RetryPolicy,
}

impl TurkishOfficialApiCrawler {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        if settings.turkish_api_key.is_empty() || settings.turkish_api_secret.is_empty() {
            anyhow::bail!("CRAWLER_TURKISH_API_KEY and CRAWLER_TURKISH_API_SECRET must be set");
        }
        Ok(Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            api_key: settings.turkish_api_key.clone(),
            api_secret: settings.turkish_api_secret.clone(),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        })
    }

    async fn availability(&self, req: &SearchRequest) -> FetchResult<String> {
        let url = format!("{API_BASE}/test/getAvailability");
        let body = matrix_request_body(req);
        let headers = [
            ("apikey", self.api_key.as_str()),
            ("apisecret", self.api_secret.as_str()),
            ("Accept", "application/json"),
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
impl SourceCrawler for TurkishOfficialApiCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self.availability(req).await?;
            let mut flights = parse_flight_matrix(&body, req.cabin_class)?;
            for f in &mut flights {
                f.source = DataSource::OfficialApi;
                for p in &mut f.prices {
                    p.source = DataSource::OfficialApi;
                }
            }
            Ok(flights)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::OfficialApi
    }

    fn name(&self) -> &'static str {
        "turkish_official_api"
    }
}

// ---------------------------------------------------------------------------
// Layer 2: website API
// ---------------------------------------------------------------------------

pub struct TurkishWebApiCrawler {
    http: ImpersonateClient,
    client_id: String,
    bfp: String,
    retry: RetryPolicy,
}

impl TurkishWebApiCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: ImpersonateClient::new(settings.l2_timeout),
            client_id: Uuid::new_v4().to_string(),
            bfp: Uuid::new_v4().simple().to_string(),
            retry: RetryPolicy::new(2, Duration::from_secs(2), Duration::from_secs(15)),
        }
    }

    async fn flight_matrix(&self, req: &SearchRequest) -> FetchResult<String> {
        let url = format!("{WEB_BASE}/api/v1/availability/flight-matrix");
        let body = matrix_request_body(req);
        let headers = [
            ("x-platform", "WEB"),
            ("x-clientid", self.client_id.as_str()),
            ("x-bfp", self.bfp.as_str()),
            ("x-country", "int"),
            ("Accept", "application/json"),
        ];
        let result = self
            .http
            .post_json(&url, &headers, &body, &[WEB_BASE])
            .await?;
        if result.contains("DS-30037") {
            return Err(CrawlError::AntiBot("Error-DS-30037 sensor rejection".into()));
        }
        Ok(result)
    }
}

#[async_trait]
impl SourceCrawler for TurkishWebApiCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self
                .retry
                .run(|| self.flight_matrix(req), CrawlError::is_retryable)
                .await?;
            parse_flight_matrix(&body, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        // GET endpoints work without Akamai sensor data.
        self.http
            .get(
                &format!("{WEB_BASE}/api/v1/booking/locations/TK/en"),
                &[
                    ("x-platform", "WEB"),
                    ("x-clientid", self.client_id.as_str()),
                ],
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
        "turkish_web_api"
    }
}

// ---------------------------------------------------------------------------
// Layer 3: browser automation with response interception
// ---------------------------------------------------------------------------

pub struct TurkishBrowserCrawler {
    capture_timeout: Duration,
}

impl TurkishBrowserCrawler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            capture_timeout: Duration::from_secs(settings.l3_timeout.min(60)),
        }
    }

    fn booking_flow(&self, req: &SearchRequest) -> BrowserFlow {
        let date_label = req.departure_date.format("%Y-%m-%d").to_string();
        BrowserFlow {
            entry_url: format!("{WEB_BASE}/en-int/flights/booking/"),
            init_scripts: vec![],
            post_load: vec![
                // Consent overlay gets pointer-events: none; removing the
                // node crashes the Next.js hydration tree.
                FlowStep::disable_overlay("#onetrust-consent-sdk"),
                FlowStep::wait_for("form", Duration::from_secs(15)),
            ],
            form_fill: vec![
                FlowStep::click("input[name='originSelector']"),
                FlowStep::type_into("input[name='originSelector']", req.origin.clone()),
                FlowStep::Sleep(Duration::from_millis(800)),
                FlowStep::press_enter("input[name='originSelector']"),
                FlowStep::click("input[name='destinationSelector']"),
                FlowStep::type_into("input[name='destinationSelector']", req.destination.clone()),
                FlowStep::Sleep(Duration::from_millis(800)),
                FlowStep::press_enter("input[name='destinationSelector']"),
                // The calendar auto-opens after the destination commits; a
                // click here would toggle it closed again.
                FlowStep::wait_for(
                    "[data-testid='datePickerDays']",
                    Duration::from_secs(10),
                ),
                FlowStep::click(&format!("[data-date='{date_label}']")),
            ],
            trigger: vec![FlowStep::click("button[type='submit']")],
            capture_patterns: vec![
                "availability/flight-matrix".to_string(),
                "availability/cheapest-prices".to_string(),
            ],
            capture_timeout: self.capture_timeout,
        }
    }
}

#[async_trait]
impl SourceCrawler for TurkishBrowserCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let session = BrowserSession::launch().await?;
            let flow = self.booking_flow(req);
            let captured = session.run_flow(&flow).await;
            let close_result = session.close().await;
            if let Err(e) = close_result {
                tracing::warn!("turkish_airlines: browser close failed: {e}");
            }

            let bodies = captured?;
            // Prefer a parseable flight-matrix body over calendar bodies.
            let mut last_err = CrawlError::shape("no parseable captured response");
            for body in &bodies {
                match parse_flight_matrix(body, req.cabin_class) {
                    Ok(flights) if !flights.is_empty() => return Ok(flights),
                    Ok(_) => {}
                    Err(e) => last_err = e,
                }
            }
            Err(last_err)
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
        "turkish_browser"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    let mut inners: Vec<Box<dyn SourceCrawler>> = Vec::new();
    if settings.turkish_official_api_enabled {
        match TurkishOfficialApiCrawler::new(settings) {
            Ok(crawler) => inners.push(Box::new(crawler)),
            Err(e) => tracing::warn!("turkish_airlines: official API disabled: {e}"),
        }
    }
    inners.push(Box::new(TurkishWebApiCrawler::new(settings)));
    inners.push(Box::new(TurkishBrowserCrawler::new(settings)));
    Ok(Box::new(FallbackCrawler::new("turkish_airlines", inners)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATRIX: &str = r#"{
        "data": {
            "originDestinationInformationList": [{
                "departureDate": "2026-04-15",
                "originDestinationOptionList": [{
                    "segmentList": [{
                        "departureAirportCode": "IST",
                        "arrivalAirportCode": "ICN",
                        "departureDateTime": "2026-04-15T01:20:00",
                        "arrivalDateTime": "2026-04-15T18:30:00",
                        "duration": "PT10H10M",
                        "marketingAirlineCode": "TK",
                        "marketingFlightNumber": "90",
                        "operatingAirlineCode": "TK",
                        "equipmentCode": "77W"
                    }],
                    "fareCategory": {
                        "ECONOMY": {
                            "status": "AVAILABLE",
                            "startingPrice": {"amount": 1234.56, "currencyCode": "USD"},
                            "brandList": [
                                {"brandCode": "EP", "brandName": "EcoFly",
                                 "price": {"amount": 1234.56, "currencyCode": "USD"}},
                                {"brandCode": "EF", "brandName": "ExtraFly",
                                 "price": {"amount": 1334.56, "currencyCode": "USD"}}
                            ]
                        },
                        "BUSINESS": {
                            "status": "AVAILABLE",
                            "startingPrice": {"amount": 3999.0, "currencyCode": "USD"},
                            "brandList": []
                        }
                    }
                }]
            }]
        }
    }"#;

    #[test]
    fn matrix_yields_one_flight_with_brand_prices() {
        let flights = parse_flight_matrix(MATRIX, CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        let f = &flights[0];
        assert_eq!(f.flight_number, "TK90");
        assert_eq!(f.duration_minutes, 610);
        // Two economy brands plus the business starting price.
        assert_eq!(f.prices.len(), 3);
        assert!(
            f.prices
                .iter()
                .any(|p| p.fare_class.as_deref() == Some("ECONOMY/EcoFly"))
        );
        assert!(
            f.prices
                .iter()
                .any(|p| p.fare_class.as_deref() == Some("BUSINESS"))
        );
    }

    #[test]
    fn sensor_rejection_marker_is_anti_bot() {
        let body = r#"{"message": {"code": "Error-DS-30037"}}"#;
        assert!(matches!(
            parse_flight_matrix(body, CabinClass::Economy).unwrap_err(),
            CrawlError::AntiBot(_)
        ));
    }
}
