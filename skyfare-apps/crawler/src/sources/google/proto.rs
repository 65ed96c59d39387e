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

//! # TFS Parameter Encoding
//!
//! Wrapper around the prost-generated protobuf for Google Flights' `tfs`
//! query parameter. Accepts the crawler's own schema types and produces the
//! base64 value the search URL carries.

use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use prost::Message;

use crate::schemas::{CabinClass, PassengerMix, SearchRequest, TripType};

// Pull in the generated protobuf code.
// It triggers clippy
#[allow(clippy::enum_variant_names)]
pub mod google_flights {
    include!(concat!(env!("OUT_DIR"), "/google_flights.rs"));
}
use google_flights::{Airport, FlightData, Info, Passenger, Seat, Trip};

fn seat_of(cabin: CabinClass) -> i32 {
    match cabin {
        CabinClass::Economy => Seat::Economy as i32,
        CabinClass::PremiumEconomy => Seat::PremiumEconomy as i32,
        CabinClass::Business => Seat::Business as i32,
        CabinClass::First => Seat::First as i32,
    }
}

fn trip_of(trip: TripType) -> i32 {
    match trip {
        TripType::RoundTrip => Trip::RoundTrip as i32,
        TripType::OneWay => Trip::OneWay as i32,
        TripType::MultiCity => Trip::MultiCity as i32,
    }
}

fn passenger_fields(mix: &PassengerMix) -> Vec<i32> {
    let mut fields = Vec::with_capacity(mix.total() as usize);
    fields.extend(std::iter::repeat_n(Passenger::Adult as i32, mix.adults as usize));
    fields.extend(std::iter::repeat_n(Passenger::Child as i32, mix.children as usize));
    fields.extend(std::iter::repeat_n(
        Passenger::InfantInSeat as i32,
        mix.infants_in_seat as usize,
    ));
    fields.extend(std::iter::repeat_n(
        Passenger::InfantOnLap as i32,
        mix.infants_on_lap as usize,
    ));
    fields
}

fn leg(date: chrono::NaiveDate, from: &str, to: &str) -> FlightData {
    FlightData {
        date: date.format("%Y-%m-%d").to_string(),
        max_stops: None,
        airlines: Vec::new(),
        from_flight: Some(Airport {
            airport: from.to_string(),
        }),
        to_flight: Some(Airport {
            airport: to.to_string(),
        }),
    }
}

/// Encode a search request into protobuf bytes for the `tfs` parameter.
pub(crate) fn encode_search(request: &SearchRequest) -> Result<Vec<u8>> {
    let mut data = vec![leg(request.departure_date, &request.origin, &request.destination)];
    if request.trip_type == TripType::RoundTrip {
        if let Some(return_date) = request.return_date {
            data.push(leg(return_date, &request.destination, &request.origin));
        }
    }

    let info = Info {
        data,
        passengers: passenger_fields(&request.passengers),
        seat: Some(seat_of(request.cabin_class)),
        trip: Some(trip_of(request.trip_type)),
    };

    let mut buf = Vec::new();
    info.encode(&mut buf)
        .map_err(|e| anyhow!("Encode failed: {}", e))?;
    Ok(buf)
}

/// Base64 form ready for the URL.
pub(crate) fn encode_tfs(request: &SearchRequest) -> Result<String> {
    Ok(STANDARD.encode(encode_search(request)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn request() -> SearchRequest {
        SearchRequest::builder(
            "ICN",
            "NRT",
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
        )
        .build()
        .unwrap()
    }

    fn decode(data: &[u8]) -> Info {
        Info::decode(data).expect("decode")
    }

    #[test]
    fn roundtrip_simple() {
        let encoded = encode_search(&request()).unwrap();
        // flightData is field 3, length-delimited.
        assert_eq!(encoded[0], 0x1a);
        let info = decode(&encoded);
        assert_eq!(info.data.len(), 1);
        assert_eq!(info.data[0].date, "2026-04-01");
        assert_eq!(
            info.data[0].from_flight.as_ref().unwrap().airport,
            "ICN"
        );
        assert_eq!(info.data[0].to_flight.as_ref().unwrap().airport, "NRT");
        assert_eq!(info.passengers, vec![Passenger::Adult as i32]);
        assert_eq!(info.seat, Some(Seat::Economy as i32));
        assert_eq!(info.trip, Some(Trip::OneWay as i32));
    }

    #[test]
    fn round_trip_gets_a_return_leg() {
        let req = SearchRequest::builder(
            "ICN",
            "NRT",
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
        )
        .return_date(NaiveDate::from_ymd_opt(2026, 4, 8).unwrap())
        .build()
        .unwrap();
        let info = decode(&encode_search(&req).unwrap());
        assert_eq!(info.data.len(), 2);
        assert_eq!(info.data[1].from_flight.as_ref().unwrap().airport, "NRT");
        assert_eq!(info.data[1].date, "2026-04-08");
        assert_eq!(info.trip, Some(Trip::RoundTrip as i32));
    }

    #[test]
    fn all_cabins_encode() {
        for cabin in [
            CabinClass::Economy,
            CabinClass::PremiumEconomy,
            CabinClass::Business,
            CabinClass::First,
        ] {
            let req = SearchRequest::builder(
                "ICN",
                "NRT",
                NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            )
            .cabin_class(cabin)
            .build()
            .unwrap();
            let tfs = encode_tfs(&req).unwrap();
            assert!(!tfs.is_empty());
        }
    }
}
