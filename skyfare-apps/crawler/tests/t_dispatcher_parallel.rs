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

//! Parallel-dispatch behavior over scriptable stub adapters: partial
//! failure stays partial, deadlines materialize as timeout envelopes, and
//! the pipeline merge unions duplicate observations.
//!
//! Run with:
//!     cargo test --test t_dispatcher_parallel

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use skyfare_crawler::{
    CabinClass, CrawlResult, CrawlTask, DataSource, Dispatcher, NormalizedFlight,
    NormalizedPrice, SearchRequest, SourceCrawler, merge_results,
};

struct StubAdapter {
    name: &'static str,
    source: DataSource,
    flights: Vec<NormalizedFlight>,
    delay: Duration,
    fail_with: Option<&'static str>,
}

#[async_trait]
impl SourceCrawler for StubAdapter {
    async fn crawl(&self, _task: &CrawlTask) -> CrawlResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.fail_with {
            Some(error) => CrawlResult::failure(self.source, error, 5),
            None => CrawlResult::ok(self.flights.clone(), self.source, 5),
        }
    }

    async fn health_check(&self) -> bool {
        self.fail_with.is_none()
    }

    async fn close(&self) {}

    fn declared_source(&self) -> DataSource {
        self.source
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

fn request() -> SearchRequest {
    SearchRequest::builder(
        "ICN",
        "SIN",
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
    )
    .build()
    .unwrap()
}

fn flight(number: &str, source: DataSource, amount: f64) -> NormalizedFlight {
    let dep = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
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
        prices: vec![NormalizedPrice::new(amount, "KRW", source, now)],
        source,
        source_tags: vec![],
        crawled_at: now,
    }
}

/// Three adapters: A returns two flights, B exceeds its deadline, C shares
/// one dedup key with A. Dispatch returns all three envelopes; the merge
/// folds the duplicate.
#[tokio::test]
async fn parallel_dispatch_with_partial_failure() {
    let adapter_a = Arc::new(StubAdapter {
        name: "stub_a",
        source: DataSource::GoogleProtobuf,
        flights: vec![
            flight("SQ615", DataSource::GoogleProtobuf, 800.0),
            flight("KE905", DataSource::GoogleProtobuf, 1100.0),
        ],
        delay: Duration::ZERO,
        fail_with: None,
    });
    let adapter_b = Arc::new(StubAdapter {
        name: "stub_b",
        source: DataSource::Gds,
        flights: vec![],
        // Far beyond the dispatcher deadline below.
        delay: Duration::from_secs(30),
        fail_with: None,
    });
    let adapter_c = Arc::new(StubAdapter {
        name: "stub_c",
        source: DataSource::DirectCrawl,
        flights: vec![flight("SQ615", DataSource::DirectCrawl, 820.0)],
        delay: Duration::ZERO,
        fail_with: None,
    });

    let dispatcher = Dispatcher::from_adapters(
        vec![adapter_a, adapter_b, adapter_c],
        600,
        Duration::from_secs(1),
    );

    let results = dispatcher
        .dispatch_parallel(&request(), &["stub_a", "stub_b", "stub_c"])
        .await;
    assert_eq!(results.len(), 3);

    let failed: Vec<&CrawlResult> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source, DataSource::Gds);
    assert!(failed[0].error.as_deref().unwrap().contains("timeout"));

    let merged = merge_results(&results);
    assert_eq!(merged.len(), 2);
    let sq = merged.iter().find(|f| f.flight_number == "SQ615").unwrap();
    assert_eq!(sq.prices.len(), 2);
    assert_eq!(sq.source, DataSource::GoogleProtobuf);
}

#[tokio::test]
async fn failed_adapters_never_bubble_errors() {
    let failing = Arc::new(StubAdapter {
        name: "stub_fail",
        source: DataSource::DirectCrawl,
        flights: vec![],
        delay: Duration::ZERO,
        fail_with: Some("HTTP 503: maintenance"),
    });
    let dispatcher =
        Dispatcher::from_adapters(vec![failing], 600, Duration::from_secs(2));

    let results = dispatcher.dispatch_parallel(&request(), &["stub_fail"]).await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn pipeline_yields_empty_list_when_all_sources_fail() {
    let failing = Arc::new(StubAdapter {
        name: "stub_down",
        source: DataSource::DirectCrawl,
        flights: vec![],
        delay: Duration::ZERO,
        fail_with: Some("connect refused"),
    });
    let dispatcher =
        Dispatcher::from_adapters(vec![failing], 600, Duration::from_secs(2));

    // Empty output, not an error: the caller inspects per-source
    // envelopes to tell "all failed" from "no flights".
    let merged = dispatcher.dispatch_pipeline(&request()).await;
    assert!(merged.is_empty());
}

#[tokio::test]
async fn dispatch_single_unknown_source_is_an_error() {
    let dispatcher = Dispatcher::from_adapters(vec![], 600, Duration::from_secs(2));
    assert!(
        dispatcher
            .dispatch_single(&request(), "nope")
            .await
            .is_err()
    );
}

#[tokio::test]
async fn unknown_names_are_skipped_in_parallel_dispatch() {
    let ok = Arc::new(StubAdapter {
        name: "stub_ok",
        source: DataSource::DirectCrawl,
        flights: vec![flight("LJ201", DataSource::DirectCrawl, 99000.0)],
        delay: Duration::ZERO,
        fail_with: None,
    });
    let dispatcher = Dispatcher::from_adapters(vec![ok], 600, Duration::from_secs(2));

    let results = dispatcher
        .dispatch_parallel(&request(), &["stub_ok", "ghost"])
        .await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
}

#[tokio::test]
async fn health_all_reports_per_adapter() {
    let ok = Arc::new(StubAdapter {
        name: "stub_ok",
        source: DataSource::DirectCrawl,
        flights: vec![],
        delay: Duration::ZERO,
        fail_with: None,
    });
    let down = Arc::new(StubAdapter {
        name: "stub_down",
        source: DataSource::Gds,
        flights: vec![],
        delay: Duration::ZERO,
        fail_with: Some("down"),
    });
    let dispatcher =
        Dispatcher::from_adapters(vec![ok, down], 600, Duration::from_secs(2));

    let probes = dispatcher.health_all().await;
    assert_eq!(probes.len(), 2);
    assert_eq!(
        probes.iter().find(|(n, _)| *n == "stub_ok").unwrap().1,
        true
    );
    assert_eq!(
        probes.iter().find(|(n, _)| *n == "stub_down").unwrap().1,
        false
    );
}
