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

//! # Hainan Airlines Source
//!
//! Mobile fare-trends API at `app.hnair.com`. Every request carries an
//! HMAC-SHA1 signature (`hnairSign`) over the alphabetically sorted
//! primitive parameter values concatenated with a certificate hash, keyed
//! by a constant from the mobile web bundle, uppercase hex. Domestic
//! Chinese routes only; international pairs come back empty.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Value, json};
use sha1::Sha1;
use skyfare_query_queues::RetryPolicy;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Settings;
use crate::contract::{SourceCrawler, crawl_envelope};
use crate::error::{CrawlError, FetchResult};
use crate::schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    synthetic_flight_number,
};
use crate::transport::DirectClient;

const BASE_URL: &str = "https://app.hnair.com";
const FARE_TRENDS_PATH: &str = "/ticket/faretrend/airFareTrends";

// Constants lifted from the hnair mobile web bundle.
const HARD_CODE: &str = "hna_hard_code_2019";
const CERTIFICATE_HASH: &str = "1A2B3C4D5E6F7A8B9C0D1E2F3A4B5C6D7E8F9A0B";

/// HMAC-SHA1 over alphabetically sorted primitive values + certificate
/// hash, uppercase hex.
fn make_sign(merged_params: &serde_json::Map<String, Value>) -> String {
    let mut keys: Vec<&String> = merged_params.keys().collect();
    keys.sort();

    let mut message = String::new();
    for key in keys {
        match &merged_params[key.as_str()] {
            Value::Bool(b) => message.push_str(if *b { "true" } else { "false" }),
            Value::String(s) => message.push_str(s),
            Value::Number(n) => message.push_str(&n.to_string()),
            _ => {}
        }
    }
    message.push_str(CERTIFICATE_HASH);

    let mut mac = Hmac::<Sha1>::new_from_slice(HARD_CODE.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes()).to_uppercase()
}

#[derive(Debug, Deserialize)]
struct TrendsEnvelope {
    #[serde(default, rename = "respCode")]
    resp_code: Option<String>,
    #[serde(default, rename = "respMsg")]
    resp_msg: Option<String>,
    #[serde(default)]
    data: Option<TrendsData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrendsData {
    #[serde(default)]
    fare_trends: Vec<FareTrend>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FareTrend {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    discount: Option<f64>,
}

pub(crate) fn parse_fare_trends(
    body: &str,
    origin: &str,
    destination: &str,
    cabin_class: CabinClass,
) -> FetchResult<Vec<NormalizedFlight>> {
    let parsed: TrendsEnvelope = serde_json::from_str(body)?;
    if let Some(code) = parsed.resp_code.as_deref() {
        if code != "0000" && !code.is_empty() {
            return Err(CrawlError::UpstreamAdvisory(format!(
                "HU fare trends {code}: {}",
                parsed.resp_msg.unwrap_or_default()
            )));
        }
    }
    let Some(data) = parsed.data else {
        return Ok(Vec::new());
    };
    let currency = data.currency.as_deref().unwrap_or("CNY");
    let now = Utc::now();
    let mut flights = Vec::new();

    for trend in &data.fare_trends {
        let Some(amount) = trend.price.filter(|p| *p > 0.0) else {
            continue;
        };
        let Some(date) = trend
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        let dep_dt = date.and_hms_opt(0, 0, 0).unwrap().and_utc();

        let mut price = NormalizedPrice::new(amount, currency, DataSource::DirectCrawl, now);
        price.fare_class = trend.discount.map(|d| format!("{:.0}% discount", d * 100.0));

        flights.push(NormalizedFlight {
            flight_number: synthetic_flight_number("HU", origin, destination),
            airline_code: "HU".to_string(),
            airline_name: Some("Hainan Airlines".to_string()),
            operator: "HU".to_string(),
            origin: origin.to_string(),
            destination: destination.to_string(),
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

pub struct HainanAirlinesCrawler {
    client: DirectClient,
    device_id: String,
    retry: RetryPolicy,
}

impl HainanAirlinesCrawler {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            client: DirectClient::new(settings.l1_timeout)?,
            device_id: Uuid::new_v4().to_string(),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
        })
    }

    fn common_params(&self) -> serde_json::Map<String, Value> {
        let mut common = serde_json::Map::new();
        common.insert("appType".into(), json!("mweb"));
        common.insert("appVersion".into(), json!("10.11.0"));
        common.insert("deviceId".into(), json!(self.device_id));
        common.insert("channel".into(), json!("mobile_web"));
        common.insert("atarget".into(), json!("standard"));
        common.insert("gtcid".into(), json!("defualt_web_gtcid"));
        common
    }

    async fn fare_trends(
        &self,
        origin: &str,
        destination: &str,
        date: NaiveDate,
    ) -> FetchResult<String> {
        let mut data = serde_json::Map::new();
        data.insert("orgCode".into(), json!(origin));
        data.insert("dstCode".into(), json!(destination));
        data.insert("depDate".into(), json!(date.format("%Y-%m-%d").to_string()));
        data.insert("tripType".into(), json!("OW"));

        let mut merged = self.common_params();
        merged.extend(data.clone());
        let sign = make_sign(&merged);

        let url = format!("{BASE_URL}{FARE_TRENDS_PATH}?hnairSign={sign}");
        let body = json!({
            "common": Value::Object(self.common_params()),
            "data": Value::Object(data),
        });
        let headers = [
            ("Origin", "https://m.hnair.com"),
            ("Referer", "https://m.hnair.com/"),
            ("appver", "10.11.0"),
        ];
        self.client.post_json(&url, &headers, &body).await
    }
}

#[async_trait]
impl SourceCrawler for HainanAirlinesCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let req = &task.search_request;
        crawl_envelope(self.declared_source(), self.name(), async {
            let body = self
                .retry
                .run(
                    || self.fare_trends(&req.origin, &req.destination, req.departure_date),
                    CrawlError::is_retryable,
                )
                .await?;
            parse_fare_trends(&body, &req.origin, &req.destination, req.cabin_class)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        // Known-good domestic pair.
        let date = Utc::now().date_naive() + chrono::Duration::days(14);
        match self.fare_trends("PEK", "HAK", date).await {
            Ok(body) => serde_json::from_str::<TrendsEnvelope>(&body).is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        DataSource::DirectCrawl
    }

    fn name(&self) -> &'static str {
        "hainan_airlines"
    }
}

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(HainanAirlinesCrawler::new(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_uppercase_hex() {
        let mut params = serde_json::Map::new();
        params.insert("b".into(), json!("two"));
        params.insert("a".into(), json!(1));
        params.insert("c".into(), json!(true));
        params.insert("skip".into(), json!({"nested": 1}));

        let sig1 = make_sign(&params);
        let sig2 = make_sign(&params);
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 40);
        assert_eq!(sig1, sig1.to_uppercase());
    }

    #[test]
    fn sign_depends_on_values() {
        let mut a = serde_json::Map::new();
        a.insert("k".into(), json!("v1"));
        let mut b = serde_json::Map::new();
        b.insert("k".into(), json!("v2"));
        assert_ne!(make_sign(&a), make_sign(&b));
    }

    #[test]
    fn trends_parse_to_synthetic_rows() {
        let body = r#"{
            "respCode": "0000",
            "data": {
                "currency": "CNY",
                "fareTrends": [
                    {"date": "2026-04-01", "price": 890.0, "discount": 0.55},
                    {"date": "2026-04-02", "price": 0}
                ]
            }
        }"#;
        let flights = parse_fare_trends(body, "PEK", "HAK", CabinClass::Economy).unwrap();
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].flight_number, "HU-PEKHAK");
        assert!(flights[0].is_synthetic());
        assert_eq!(flights[0].prices[0].amount, 890.0);
    }

    #[test]
    fn upstream_error_code_is_advisory() {
        let body = r#"{"respCode": "9001", "respMsg": "date out of range"}"#;
        assert!(matches!(
            parse_fare_trends(body, "PEK", "HAK", CabinClass::Economy).unwrap_err(),
            CrawlError::UpstreamAdvisory(_)
        ));
    }
}
