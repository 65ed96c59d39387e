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

//! # Crawler Contract
//!
//! The uniform interface every source adapter implements, and the compound
//! adapter that layers fallbacks (try L2, fall back to L3, ...).

use async_trait::async_trait;

use crate::error::CrawlError;
use crate::schemas::{CrawlResult, CrawlTask, DataSource, NormalizedFlight};

/// Contract implemented by every source adapter.
///
/// `crawl` must not fail outside the [`CrawlResult`] envelope: adapters
/// catch their own errors, record wall-clock duration, and return
/// `success = false` with an error string and an empty flight list.
#[async_trait]
pub trait SourceCrawler: Send + Sync {
    /// Execute a crawl task and return normalized results.
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult;

    /// Minimal cheap probe: is the source reachable right now?
    async fn health_check(&self) -> bool;

    /// Release held resources (long-lived clients, browsers). Idempotent.
    async fn close(&self);

    /// Provenance tag stamped on every flight this adapter emits.
    fn declared_source(&self) -> DataSource;

    /// Registry name, e.g. `"air_busan"`.
    fn name(&self) -> &'static str;
}

/// Wrap an adapter's fallible crawl body into the result envelope,
/// measuring wall-clock duration. Every adapter funnels through here so the
/// no-escape property holds in one place.
pub async fn crawl_envelope<F>(source: DataSource, name: &str, body: F) -> CrawlResult
where
    F: std::future::Future<Output = Result<Vec<NormalizedFlight>, CrawlError>>,
{
    let start = std::time::Instant::now();
    match body.await {
        Ok(flights) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            tracing::info!("{name}: {} flights in {elapsed_ms} ms", flights.len());
            CrawlResult::ok(flights, source, elapsed_ms)
        }
        Err(e) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            tracing::warn!("{name}: crawl failed after {elapsed_ms} ms: {e}");
            CrawlResult::failure(source, e.to_string(), elapsed_ms)
        }
    }
}

/// Layered fallback over multiple inner adapters: tries them in declared
/// order, first success wins and later inners are skipped. Healthy when any
/// inner is healthy.
pub struct FallbackCrawler {
    name: &'static str,
    inners: Vec<Box<dyn SourceCrawler>>,
}

impl FallbackCrawler {
    pub fn new(name: &'static str, inners: Vec<Box<dyn SourceCrawler>>) -> Self {
        assert!(!inners.is_empty(), "fallback needs at least one inner");
        Self { name, inners }
    }
}

#[async_trait]
impl SourceCrawler for FallbackCrawler {
    async fn crawl(&self, task: &CrawlTask) -> CrawlResult {
        let mut last: Option<CrawlResult> = None;
        for inner in &self.inners {
            let result = inner.crawl(task).await;
            if result.success {
                return result;
            }
            tracing::warn!(
                "{}: inner {} failed ({}), falling back",
                self.name,
                inner.name(),
                result.error.as_deref().unwrap_or("unknown")
            );
            last = Some(result);
        }
        // Unreachable inners is a construction bug; last is always set here.
        last.unwrap_or_else(|| {
            CrawlResult::failure(self.declared_source(), "no inner adapters", 0)
        })
    }

    async fn health_check(&self) -> bool {
        for inner in &self.inners {
            if inner.health_check().await {
                return true;
            }
        }
        false
    }

    async fn close(&self) {
        for inner in &self.inners {
            inner.close().await;
        }
    }

    fn declared_source(&self) -> DataSource {
        self.inners[0].declared_source()
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Scriptable crawler for contract and dispatcher tests.
    pub struct StubCrawler {
        pub source: DataSource,
        pub static_name: &'static str,
        pub flights: Vec<NormalizedFlight>,
        pub fail_with: Option<String>,
        pub healthy: AtomicBool,
        pub calls: AtomicU32,
        pub delay: std::time::Duration,
    }

    impl StubCrawler {
        pub fn ok(name: &'static str, source: DataSource, flights: Vec<NormalizedFlight>) -> Self {
            Self {
                source,
                static_name: name,
                flights,
                fail_with: None,
                healthy: AtomicBool::new(true),
                calls: AtomicU32::new(0),
                delay: std::time::Duration::ZERO,
            }
        }

        pub fn failing(name: &'static str, source: DataSource, error: &str) -> Self {
            Self {
                fail_with: Some(error.to_string()),
                healthy: AtomicBool::new(false),
                ..Self::ok(name, source, Vec::new())
            }
        }
    }

    #[async_trait]
    impl SourceCrawler for StubCrawler {
        async fn crawl(&self, _task: &CrawlTask) -> CrawlResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.fail_with {
                Some(error) => CrawlResult::failure(self.source, error.clone(), 1),
                None => CrawlResult::ok(self.flights.clone(), self.source, 1),
            }
        }

        async fn health_check(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn close(&self) {}

        fn declared_source(&self) -> DataSource {
            self.source
        }

        fn name(&self) -> &'static str {
            self.static_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StubCrawler;
    use super::*;
    use crate::schemas::{PassengerMix, SearchRequest};
    use chrono::NaiveDate;

    fn task(source: DataSource) -> CrawlTask {
        let req = SearchRequest::builder(
            "ICN",
            "NRT",
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
        )
        .passengers(PassengerMix::adults(1))
        .build()
        .unwrap();
        CrawlTask::new(req, source)
    }

    #[tokio::test]
    async fn fallback_first_success_wins() {
        let failing = StubCrawler::failing("primary", DataSource::OfficialApi, "HTTP 500");
        let ok = StubCrawler::ok("secondary", DataSource::DirectCrawl, Vec::new());
        let fallback =
            FallbackCrawler::new("layered", vec![Box::new(failing), Box::new(ok)]);

        let result = fallback.crawl(&task(DataSource::OfficialApi)).await;
        assert!(result.success);
        assert_eq!(result.source, DataSource::DirectCrawl);
    }

    #[tokio::test]
    async fn fallback_skips_later_inners_on_success() {
        let first = StubCrawler::ok("first", DataSource::OfficialApi, Vec::new());
        let second = StubCrawler::ok("second", DataSource::DirectCrawl, Vec::new());
        let fallback =
            FallbackCrawler::new("layered", vec![Box::new(first), Box::new(second)]);

        let result = fallback.crawl(&task(DataSource::OfficialApi)).await;
        assert!(result.success);
        assert_eq!(result.source, DataSource::OfficialApi);
    }

    #[tokio::test]
    async fn fallback_reports_last_failure() {
        let a = StubCrawler::failing("a", DataSource::OfficialApi, "HTTP 500");
        let b = StubCrawler::failing("b", DataSource::DirectCrawl, "timeout after 30s");
        let fallback = FallbackCrawler::new("layered", vec![Box::new(a), Box::new(b)]);

        let result = fallback.crawl(&task(DataSource::OfficialApi)).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("timeout"));
    }

    #[tokio::test]
    async fn fallback_health_ok_if_any_inner_healthy() {
        let sick = StubCrawler::failing("sick", DataSource::OfficialApi, "down");
        let fine = StubCrawler::ok("fine", DataSource::DirectCrawl, Vec::new());
        let fallback = FallbackCrawler::new("layered", vec![Box::new(sick), Box::new(fine)]);
        assert!(fallback.health_check().await);
    }

    #[tokio::test]
    async fn envelope_measures_and_captures_errors() {
        let result = crawl_envelope(DataSource::DirectCrawl, "stub", async {
            Err(CrawlError::shape("missing field 'flights'"))
        })
        .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing field"));
        assert!(result.flights.is_empty());
    }
}
