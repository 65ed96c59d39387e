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

//! # Result Merger
//!
//! Folds duplicate flights observed from multiple sources into one record
//! per dedup key. Prices are unioned without deduplication (two sources
//! reporting the same amount is information, not noise); non-price metadata
//! comes from the highest-trust contributing source.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::schemas::{CrawlResult, NormalizedFlight};

/// Merge flights from several crawl results.
///
/// - Failed envelopes are discarded.
/// - Flights group by [`NormalizedFlight::dedup_key`]; the first observation
///   seeds the group.
/// - Later observations append all their prices; their metadata replaces the
///   seed's only when their source ranks strictly higher in trust.
/// - Each merged flight's `source_tags` lists the distinct contributing
///   sources.
/// - Output sorts by lowest price ascending, priceless flights last, ties
///   broken by dedup key.
pub fn merge_results(results: &[CrawlResult]) -> Vec<NormalizedFlight> {
    let mut groups: HashMap<String, NormalizedFlight> = HashMap::new();
    let mut input_count = 0usize;

    for cr in results {
        if !cr.success {
            continue;
        }
        for flight in &cr.flights {
            input_count += 1;
            let key = flight.dedup_key();
            match groups.get_mut(&key) {
                None => {
                    let mut seed = flight.clone();
                    seed.source_tags = vec![seed.source];
                    groups.insert(key, seed);
                }
                Some(existing) => {
                    existing.prices.extend(flight.prices.iter().cloned());
                    if !existing.source_tags.contains(&flight.source) {
                        existing.source_tags.push(flight.source);
                    }
                    if flight.source.trust_rank() > existing.source.trust_rank() {
                        let merged_prices = std::mem::take(&mut existing.prices);
                        let tags = std::mem::take(&mut existing.source_tags);
                        let mut replacement = flight.clone();
                        replacement.prices = merged_prices;
                        replacement.source_tags = tags;
                        *existing = replacement;
                    }
                }
            }
        }
    }

    let mut merged: Vec<NormalizedFlight> = groups.into_values().collect();
    merged.sort_by(|a, b| compare_by_lowest_price(a, b));

    tracing::info!(
        "Merged {} crawled flights into {} unique flights",
        input_count,
        merged.len()
    );
    merged
}

fn compare_by_lowest_price(a: &NormalizedFlight, b: &NormalizedFlight) -> Ordering {
    match (a.lowest_price(), b.lowest_price()) {
        (Some(x), Some(y)) => x
            .partial_cmp(&y)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.dedup_key().cmp(&b.dedup_key())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.dedup_key().cmp(&b.dedup_key()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{CabinClass, DataSource, NormalizedPrice};
    use chrono::{DateTime, TimeZone, Utc};

    fn flight(
        number: &str,
        source: DataSource,
        dep: DateTime<Utc>,
        amounts: &[f64],
    ) -> NormalizedFlight {
        let now = Utc::now();
        NormalizedFlight {
            flight_number: number.to_string(),
            airline_code: number[..2].to_string(),
            airline_name: None,
            operator: number[..2].to_string(),
            origin: "ICN".to_string(),
            destination: "SIN".to_string(),
            departure_time: dep,
            arrival_time: dep + chrono::Duration::minutes(382),
            duration_minutes: 382,
            cabin_class: CabinClass::Economy,
            aircraft_type: None,
            stops: 0,
            prices: amounts
                .iter()
                .map(|a| NormalizedPrice::new(*a, "KRW", source, now))
                .collect(),
            source,
            source_tags: vec![],
            crawled_at: now,
        }
    }

    fn ok(flights: Vec<NormalizedFlight>, source: DataSource) -> CrawlResult {
        CrawlResult::ok(flights, source, 10)
    }

    #[test]
    fn failed_envelopes_are_discarded() {
        let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let results = vec![
            ok(
                vec![flight("SQ615", DataSource::DirectCrawl, dep, &[800.0])],
                DataSource::DirectCrawl,
            ),
            CrawlResult::failure(DataSource::Gds, "timeout after 30s", 30_000),
        ];
        let merged = merge_results(&results);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn duplicate_flights_union_prices_and_keep_trusted_metadata() {
        let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let mut low_trust = flight("SQ615", DataSource::DirectCrawl, dep, &[820.0, 900.0]);
        low_trust.airline_name = Some("scraped name".to_string());
        let mut high_trust = flight("SQ615", DataSource::GoogleProtobuf, dep, &[800.0]);
        high_trust.airline_name = Some("Singapore Airlines".to_string());

        // Low-trust source arrives first: metadata must still end up from
        // the high-trust one, with all three prices.
        let results = vec![
            ok(vec![low_trust], DataSource::DirectCrawl),
            ok(vec![high_trust], DataSource::GoogleProtobuf),
        ];
        let merged = merge_results(&results);
        assert_eq!(merged.len(), 1);
        let f = &merged[0];
        assert_eq!(f.prices.len(), 3);
        assert_eq!(f.source, DataSource::GoogleProtobuf);
        assert_eq!(f.airline_name.as_deref(), Some("Singapore Airlines"));
        assert_eq!(f.lowest_price(), Some(800.0));
        assert_eq!(f.source_tags.len(), 2);
    }

    #[test]
    fn lower_trust_does_not_overwrite_metadata() {
        let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let high = flight("SQ615", DataSource::GoogleProtobuf, dep, &[800.0]);
        let low = flight("SQ615", DataSource::Gds, dep, &[810.0]);
        let merged = merge_results(&[
            ok(vec![high], DataSource::GoogleProtobuf),
            ok(vec![low], DataSource::Gds),
        ]);
        assert_eq!(merged[0].source, DataSource::GoogleProtobuf);
        assert_eq!(merged[0].prices.len(), 2);
    }

    #[test]
    fn different_departure_dates_stay_distinct() {
        let d1 = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2026, 3, 16, 8, 0, 0).unwrap();
        let merged = merge_results(&[
            ok(
                vec![flight("SQ615", DataSource::GoogleProtobuf, d1, &[800.0])],
                DataSource::GoogleProtobuf,
            ),
            ok(
                vec![flight("SQ615", DataSource::DirectCrawl, d2, &[820.0])],
                DataSource::DirectCrawl,
            ),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn output_keys_are_pairwise_distinct_and_sorted() {
        let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let dep2 = Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap();
        let merged = merge_results(&[ok(
            vec![
                flight("KE905", DataSource::DirectCrawl, dep2, &[1200.0]),
                flight("SQ615", DataSource::DirectCrawl, dep, &[800.0]),
                flight("SQ615", DataSource::DirectCrawl, dep, &[750.0]),
                flight("OZ751", DataSource::DirectCrawl, dep, &[]),
            ],
            DataSource::DirectCrawl,
        )]);

        let keys: Vec<String> = merged.iter().map(|f| f.dedup_key()).collect();
        let mut deduped = keys.clone();
        deduped.dedup();
        assert_eq!(keys, deduped);

        // Cheapest first, priceless last.
        assert_eq!(merged[0].flight_number, "SQ615");
        assert_eq!(merged[0].lowest_price(), Some(750.0));
        assert_eq!(merged.last().unwrap().flight_number, "OZ751");
        assert_eq!(merged.last().unwrap().lowest_price(), None);
    }

    #[test]
    fn merge_is_permutation_invariant() {
        let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let a = ok(
            vec![flight("SQ615", DataSource::GoogleProtobuf, dep, &[800.0])],
            DataSource::GoogleProtobuf,
        );
        let b = ok(
            vec![flight("SQ615", DataSource::DirectCrawl, dep, &[820.0, 900.0])],
            DataSource::DirectCrawl,
        );

        let forward = merge_results(&[a.clone(), b.clone()]);
        let backward = merge_results(&[b, a]);

        assert_eq!(forward.len(), backward.len());
        for (x, y) in forward.iter().zip(backward.iter()) {
            assert_eq!(x.dedup_key(), y.dedup_key());
            assert_eq!(x.source, y.source);
            let mut px: Vec<u64> = x.prices.iter().map(|p| p.amount.to_bits()).collect();
            let mut py: Vec<u64> = y.prices.iter().map(|p| p.amount.to_bits()).collect();
            px.sort_unstable();
            py.sort_unstable();
            assert_eq!(px, py);
        }
    }

    #[test]
    fn single_source_merge_is_idempotent() {
        let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let results = vec![ok(
            vec![
                flight("SQ615", DataSource::DirectCrawl, dep, &[800.0]),
                flight("KE905", DataSource::DirectCrawl, dep, &[900.0]),
            ],
            DataSource::DirectCrawl,
        )];
        let once = merge_results(&results);
        let again = merge_results(&[ok(once.clone(), DataSource::DirectCrawl)]);
        assert_eq!(once.len(), again.len());
        for (x, y) in once.iter().zip(again.iter()) {
            assert_eq!(x.dedup_key(), y.dedup_key());
            assert_eq!(x.prices.len(), y.prices.len());
        }
    }
}
