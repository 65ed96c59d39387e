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

//! # Crawl Schemas
//!
//! Value objects and records shared by every source crawler, the dispatcher,
//! the merger, the scorer, and the store. Everything here is plain data;
//! effectful code lives in `transport`, `sources`, and `pipeline`.

use std::time::Duration;

use anyhow::{Result, ensure};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Seat product class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CabinClass {
    Economy,
    PremiumEconomy,
    Business,
    First,
}

impl Default for CabinClass {
    fn default() -> Self {
        CabinClass::Economy
    }
}

impl CabinClass {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "economy" | "e" => Some(CabinClass::Economy),
            "premium_economy" | "premium" | "pe" => Some(CabinClass::PremiumEconomy),
            "business" | "b" => Some(CabinClass::Business),
            "first" | "f" => Some(CabinClass::First),
            _ => None,
        }
    }

    pub fn as_str_name(&self) -> &'static str {
        match self {
            CabinClass::Economy => "ECONOMY",
            CabinClass::PremiumEconomy => "PREMIUM_ECONOMY",
            CabinClass::Business => "BUSINESS",
            CabinClass::First => "FIRST",
        }
    }

    /// One-letter booking code used by several carriers' search forms.
    pub fn booking_code(&self) -> &'static str {
        match self {
            CabinClass::Economy => "Y",
            CabinClass::PremiumEconomy => "W",
            CabinClass::Business => "C",
            CabinClass::First => "F",
        }
    }
}

/// Journey shape of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripType {
    OneWay,
    RoundTrip,
    MultiCity,
}

impl Default for TripType {
    fn default() -> Self {
        TripType::OneWay
    }
}

impl TripType {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "one_way" | "oneway" => Some(TripType::OneWay),
            "round_trip" | "roundtrip" | "round" => Some(TripType::RoundTrip),
            "multi_city" | "multicity" | "multi" => Some(TripType::MultiCity),
            _ => None,
        }
    }
}

/// Provenance tag on flights and prices.
///
/// `trust_rank` drives the merger's metadata selection: when the same flight
/// is observed from several sources, the highest-ranked source's non-price
/// fields win. Sources not listed here rank 0 (lowest), so a forgotten
/// placement degrades gracefully instead of hijacking the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    GoogleProtobuf,
    KiwiApi,
    OfficialApi,
    DirectCrawl,
    Gds,
}

impl DataSource {
    pub fn trust_rank(&self) -> u8 {
        match self {
            DataSource::GoogleProtobuf => 40,
            DataSource::KiwiApi => 30,
            DataSource::OfficialApi => 25,
            DataSource::DirectCrawl => 20,
            DataSource::Gds => 10,
        }
    }

    pub fn as_str_name(&self) -> &'static str {
        match self {
            DataSource::GoogleProtobuf => "GOOGLE_PROTOBUF",
            DataSource::KiwiApi => "KIWI_API",
            DataSource::OfficialApi => "OFFICIAL_API",
            DataSource::DirectCrawl => "DIRECT_CRAWL",
            DataSource::Gds => "GDS",
        }
    }
}

/// Passenger counts for one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerMix {
    pub adults: u8,
    #[serde(default)]
    pub children: u8,
    #[serde(default)]
    pub infants_in_seat: u8,
    #[serde(default)]
    pub infants_on_lap: u8,
}

impl Default for PassengerMix {
    fn default() -> Self {
        Self {
            adults: 1,
            children: 0,
            infants_in_seat: 0,
            infants_on_lap: 0,
        }
    }
}

impl PassengerMix {
    pub fn adults(count: u8) -> Self {
        Self {
            adults: count,
            ..Default::default()
        }
    }

    pub fn total(&self) -> u8 {
        self.adults + self.children + self.infants_in_seat + self.infants_on_lap
    }

    pub fn infants(&self) -> u8 {
        self.infants_in_seat + self.infants_on_lap
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.adults >= 1, "At least one adult is required");
        ensure!(
            self.infants() <= self.adults,
            "Number of infants cannot exceed adults"
        );
        ensure!(self.total() <= 9, "Maximum 9 passengers per search");
        Ok(())
    }
}

fn is_iata_airport(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Immutable search query.
///
/// Build with [`SearchRequest::builder`]; `build()` enforces the shape
/// invariants (IATA codes, origin != destination, return after departure,
/// valid passenger mix), so a constructed request is always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub trip_type: TripType,
    #[serde(default)]
    pub cabin_class: CabinClass,
    #[serde(default)]
    pub passengers: PassengerMix,
    pub currency: String,
}

impl SearchRequest {
    pub fn builder(
        origin: impl Into<String>,
        destination: impl Into<String>,
        departure_date: NaiveDate,
    ) -> SearchRequestBuilder {
        SearchRequestBuilder {
            origin: origin.into().to_ascii_uppercase(),
            destination: destination.into().to_ascii_uppercase(),
            departure_date,
            return_date: None,
            trip_type: TripType::OneWay,
            cabin_class: CabinClass::Economy,
            passengers: PassengerMix::default(),
            currency: crate::config::settings().default_currency.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequestBuilder {
    origin: String,
    destination: String,
    departure_date: NaiveDate,
    return_date: Option<NaiveDate>,
    trip_type: TripType,
    cabin_class: CabinClass,
    passengers: PassengerMix,
    currency: String,
}

impl SearchRequestBuilder {
    pub fn return_date(mut self, date: NaiveDate) -> Self {
        self.return_date = Some(date);
        self.trip_type = TripType::RoundTrip;
        self
    }

    pub fn trip_type(mut self, trip_type: TripType) -> Self {
        self.trip_type = trip_type;
        self
    }

    pub fn cabin_class(mut self, cabin: CabinClass) -> Self {
        self.cabin_class = cabin;
        self
    }

    pub fn passengers(mut self, passengers: PassengerMix) -> Self {
        self.passengers = passengers;
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn build(self) -> Result<SearchRequest> {
        ensure!(
            is_iata_airport(&self.origin),
            "Origin must be a 3-letter IATA code, got '{}'",
            self.origin
        );
        ensure!(
            is_iata_airport(&self.destination),
            "Destination must be a 3-letter IATA code, got '{}'",
            self.destination
        );
        ensure!(
            self.origin != self.destination,
            "Origin and destination must differ"
        );
        if let Some(ret) = self.return_date {
            ensure!(
                ret >= self.departure_date,
                "Return date {} is before departure date {}",
                ret,
                self.departure_date
            );
        }
        self.passengers.validate()?;
        ensure!(!self.currency.is_empty(), "Currency must not be empty");
        Ok(SearchRequest {
            origin: self.origin,
            destination: self.destination,
            departure_date: self.departure_date,
            return_date: self.return_date,
            trip_type: self.trip_type,
            cabin_class: self.cabin_class,
            passengers: self.passengers,
            currency: self.currency,
        })
    }
}

/// One unit of crawl work: a search request bound to a target source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    pub search_request: SearchRequest,
    pub source: DataSource,
    /// Per-task deadline override in seconds; the dispatcher fills the
    /// per-layer default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl CrawlTask {
    pub fn new(search_request: SearchRequest, source: DataSource) -> Self {
        Self {
            search_request,
            source,
            deadline_secs: None,
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// One price observation for a flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPrice {
    pub amount: f64,
    pub currency: String,
    pub source: DataSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fare_class: Option<String>,
    #[serde(default)]
    pub includes_baggage: bool,
    #[serde(default)]
    pub includes_meal: bool,
    #[serde(default)]
    pub seat_selection_included: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_url: Option<String>,
    pub crawled_at: DateTime<Utc>,
}

impl NormalizedPrice {
    pub fn new(
        amount: f64,
        currency: impl Into<String>,
        source: DataSource,
        crawled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            amount,
            currency: currency.into(),
            source,
            fare_class: None,
            includes_baggage: false,
            includes_meal: false,
            seat_selection_included: false,
            booking_url: None,
            crawled_at,
        }
    }
}

/// Synthetic flight number for sources that only expose per-day lowest
/// fares without flight identity: `"{CODE}-{OOO}{DDD}"`.
pub fn synthetic_flight_number(airline_code: &str, origin: &str, destination: &str) -> String {
    format!("{airline_code}-{origin}{destination}")
}

/// One flight (or one synthetic per-day lowest-fare row), normalized to the
/// common shape every source adapter emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFlight {
    pub flight_number: String,
    pub airline_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airline_name: Option<String>,
    /// Operating carrier; equals `airline_code` outside codeshares.
    pub operator: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub cabin_class: CabinClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    pub stops: u32,
    #[serde(default)]
    pub prices: Vec<NormalizedPrice>,
    pub source: DataSource,
    /// Distinct sources folded into this record by the merger. Single-source
    /// flights carry just their own source.
    #[serde(default)]
    pub source_tags: Vec<DataSource>,
    pub crawled_at: DateTime<Utc>,
}

impl NormalizedFlight {
    /// Cheapest observed fare, if any source supplied prices.
    pub fn lowest_price(&self) -> Option<f64> {
        self.prices
            .iter()
            .map(|p| p.amount)
            .fold(None, |acc, amount| match acc {
                Some(lowest) if lowest <= amount => Some(lowest),
                _ => Some(amount),
            })
    }

    /// Canonical identity for cross-source merging. A pure function of
    /// flight number, route, and departure time truncated to the minute.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.flight_number,
            self.origin,
            self.destination,
            self.departure_time.format("%Y-%m-%dT%H:%M")
        )
    }

    /// Per-day lowest-fare rows emitted by calendar-only sources carry a
    /// `XX-OOODDD` flight number and zero duration.
    pub fn is_synthetic(&self) -> bool {
        self.duration_minutes == 0
            && self.arrival_time == self.departure_time
            && self.flight_number.len() >= 4
            && self.flight_number.as_bytes().get(2) == Some(&b'-')
    }

    pub fn sources_merged(&self) -> usize {
        self.source_tags.len().max(1)
    }
}

/// Envelope every crawl returns. Adapters never raise out of `crawl()`:
/// failures are carried here with `success == false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    #[serde(default)]
    pub flights: Vec<NormalizedFlight>,
    pub source: DataSource,
    pub crawled_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl CrawlResult {
    pub fn ok(flights: Vec<NormalizedFlight>, source: DataSource, duration_ms: u64) -> Self {
        Self {
            flights,
            source,
            crawled_at: Utc::now(),
            duration_ms,
            success: true,
            error: None,
        }
    }

    pub fn failure(source: DataSource, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            flights: Vec::new(),
            source,
            crawled_at: Utc::now(),
            duration_ms,
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn flight(number: &str, dep: DateTime<Utc>) -> NormalizedFlight {
        NormalizedFlight {
            flight_number: number.to_string(),
            airline_code: "SQ".to_string(),
            airline_name: Some("Singapore Airlines".to_string()),
            operator: "SQ".to_string(),
            origin: "ICN".to_string(),
            destination: "SIN".to_string(),
            departure_time: dep,
            arrival_time: dep + chrono::Duration::minutes(382),
            duration_minutes: 382,
            cabin_class: CabinClass::Economy,
            aircraft_type: None,
            stops: 0,
            prices: vec![],
            source: DataSource::DirectCrawl,
            source_tags: vec![],
            crawled_at: Utc::now(),
        }
    }

    #[test]
    fn dedup_key_is_pure_over_identity_fields() {
        let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let a = flight("SQ615", dep);
        let mut b = flight("SQ615", dep);
        b.aircraft_type = Some("A350".to_string());
        b.source = DataSource::Gds;
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key(), "SQ615_ICN_SIN_2026-03-15T08:00");
    }

    #[test]
    fn dedup_key_truncates_to_the_minute() {
        let a = flight(
            "SQ615",
            Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 10).unwrap(),
        );
        let b = flight(
            "SQ615",
            Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 45).unwrap(),
        );
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_separates_dates() {
        let a = flight("SQ615", Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap());
        let b = flight("SQ615", Utc.with_ymd_and_hms(2026, 3, 16, 8, 0, 0).unwrap());
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn lowest_price_over_observations() {
        let mut f = flight("SQ615", Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap());
        assert_eq!(f.lowest_price(), None);
        let now = Utc::now();
        f.prices = vec![
            NormalizedPrice::new(820.0, "KRW", DataSource::DirectCrawl, now),
            NormalizedPrice::new(800.0, "KRW", DataSource::GoogleProtobuf, now),
            NormalizedPrice::new(900.0, "KRW", DataSource::DirectCrawl, now),
        ];
        assert_eq!(f.lowest_price(), Some(800.0));
    }

    #[test]
    fn synthetic_rows_are_detected() {
        let dep = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut f = flight(&synthetic_flight_number("TW", "ICN", "NRT"), dep);
        f.arrival_time = dep;
        f.duration_minutes = 0;
        assert_eq!(f.flight_number, "TW-ICNNRT");
        assert!(f.is_synthetic());
        assert!(!flight("SQ615", dep).is_synthetic());
    }

    #[test]
    fn builder_rejects_bad_routes() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert!(SearchRequest::builder("ICN", "ICN", date).build().is_err());
        assert!(SearchRequest::builder("IC", "SIN", date).build().is_err());
        assert!(SearchRequest::builder("ICN", "SIN", date).build().is_ok());
    }

    #[test]
    fn builder_rejects_return_before_departure() {
        let dep = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let ret = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert!(
            SearchRequest::builder("ICN", "SIN", dep)
                .return_date(ret)
                .build()
                .is_err()
        );
    }

    #[test]
    fn passenger_mix_validation() {
        assert!(PassengerMix::adults(0).validate().is_err());
        assert!(PassengerMix::adults(1).validate().is_ok());
        let too_many_infants = PassengerMix {
            adults: 1,
            infants_on_lap: 2,
            ..Default::default()
        };
        assert!(too_many_infants.validate().is_err());
    }

    #[test]
    fn builder_uppercases_iata_codes() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let req = SearchRequest::builder("icn", "sin", date).build().unwrap();
        assert_eq!(req.origin, "ICN");
        assert_eq!(req.destination, "SIN");
    }
}
