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

//! SOCS cookie generation for Google services, bypassing the EU consent
//! interstitial without a browser round trip.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{Datelike, Local};

// =============================================================================
// Constants - Known-Good Browser Values
// =============================================================================

/// Binary blob (5 bytes)
/// Original: [0x08, 0x80, 0xc4, 0xf6, 0xca]
const DEFAULT_BINARY_BLOB: &[u8] = &[0x08, 0x80, 0xc4, 0xf6, 0xca];

// =============================================================================
// Low-Level Protobuf Encoding
// =============================================================================

const WIRE_LENGTH_DELIMITED: u8 = 2;

/// Encode a 32-bit unsigned integer as protobuf varint.
fn encode_varint(mut value: u32) -> Vec<u8> {
    let mut result = Vec::new();
    while value > 0x7F {
        result.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    result.push((value & 0x7F) as u8);
    result
}

/// Build a length-delimited protobuf field.
/// Structure: <tag_byte><length_varint><data_bytes>
fn make_length_delimited(field_number: u8, data: &[u8]) -> Vec<u8> {
    let length_bytes = encode_varint(data.len() as u32);
    let mut field = vec![(field_number << 3) | WIRE_LENGTH_DELIMITED];
    field.extend(length_bytes);
    field.extend_from_slice(data);
    field
}

// =============================================================================
// Public API
// =============================================================================

/// Generate a SOCS cookie value in the browser-observed format:
/// - Tag 2 (length-delimited): Server product ID + "en" locale
/// - Tag 3 (length-delimited): Binary blob (default stable bytes)
///
/// ## Returns
///
/// Base64-encoded SOCS value (without "SOCS=" prefix)
fn generate_socs_cookie() -> String {
    let yesterday = Local::now()
        .date_naive()
        .pred_opt()
        .unwrap_or(Local::now().date_naive());
    let server_tag = format!(
        "boq_identityfrontenduiserver_{}{:02}{:02}.03_p0en",
        yesterday.year(),
        yesterday.month(),
        yesterday.day()
    );
    let tag2 = make_length_delimited(2, server_tag.as_bytes());
    let tag3 = make_length_delimited(3, DEFAULT_BINARY_BLOB);

    let protobuf = [tag2, tag3].concat();
    STANDARD.encode(&protobuf)
}

/// Generate complete cookie header with CONSENT+SOCs pair.
///
/// ## Returns
///
/// Complete header: "CONSENT=PENDING+987;<base64>"
pub fn generate_cookie_header() -> String {
    let socs = generate_socs_cookie();
    format!("CONSENT=PENDING+987; {}", socs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn socs_cookie_is_valid_base64_protobuf() {
        let socs = generate_socs_cookie();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&socs)
            .expect("valid base64");
        // Tag 2, length-delimited.
        assert_eq!(bytes[0], (2 << 3) | WIRE_LENGTH_DELIMITED);
        let decoded = String::from_utf8_lossy(&bytes);
        assert!(decoded.contains("boq_identityfrontenduiserver_"));
    }

    #[test]
    fn cookie_header_carries_consent_pair() {
        let header = generate_cookie_header();
        assert!(header.starts_with("CONSENT=PENDING+987; "));
    }

    #[test]
    fn varint_encoding() {
        assert_eq!(encode_varint(0), vec![0]);
        assert_eq!(encode_varint(127), vec![0x7F]);
        assert_eq!(encode_varint(128), vec![0x80, 0x01]);
    }
}
