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

//! # Task Dispatcher
//!
//! Fans a search request out across source adapters. Rate limiting lives
//! here (one token bucket per source) so adapters stay stateless; each
//! fan-out leg runs under its own deadline, and every failure mode — error
//! envelope, deadline expiry, panic — materializes as a `success = false`
//! [`CrawlResult`]. Siblings are never cancelled; partial failure is data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use futures::future::join_all;
use skyfare_query_queues::TokenBucket;

use crate::config::Settings;
use crate::contract::SourceCrawler;
use crate::pipeline::merge_results;
use crate::schemas::{CrawlResult, CrawlTask, NormalizedFlight, SearchRequest};
use crate::sources;

struct DispatchEntry {
    crawler: Arc<dyn SourceCrawler>,
    bucket: TokenBucket,
    deadline: Duration,
}

pub struct Dispatcher {
    entries: HashMap<&'static str, DispatchEntry>,
    // Registry declaration order, for stable fan-out and listing.
    order: Vec<&'static str>,
}

impl Dispatcher {
    /// Build every adapter the environment has credentials for. Adapters
    /// that fail construction are logged and left out; the rest of the
    /// fleet stays usable.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut entries = HashMap::new();
        let mut order = Vec::new();
        for spec in sources::registry() {
            match (spec.build)(settings) {
                Ok(crawler) => {
                    entries.insert(
                        spec.name,
                        DispatchEntry {
                            crawler: Arc::from(crawler),
                            bucket: TokenBucket::per_minute(spec.layer.rate_per_min(settings)),
                            deadline: spec.layer.default_deadline(settings),
                        },
                    );
                    order.push(spec.name);
                }
                Err(e) => {
                    tracing::warn!("Adapter {} unavailable: {e}", spec.name);
                }
            }
        }
        tracing::info!("Dispatcher ready with {} sources", order.len());
        Self { entries, order }
    }

    /// Assemble a dispatcher from explicit adapters (tests, bespoke fleets).
    pub fn from_adapters(
        adapters: Vec<Arc<dyn SourceCrawler>>,
        rate_per_min: u32,
        deadline: Duration,
    ) -> Self {
        let mut entries = HashMap::new();
        let mut order = Vec::new();
        for crawler in adapters {
            let name = crawler.name();
            order.push(name);
            entries.insert(
                name,
                DispatchEntry {
                    crawler,
                    bucket: TokenBucket::per_minute(rate_per_min),
                    deadline,
                },
            );
        }
        Self { entries, order }
    }

    pub fn available_sources(&self) -> Vec<&'static str> {
        self.order.clone()
    }

    /// Direct invocation of one adapter, still throttled and deadlined.
    pub async fn dispatch_single(&self, request: &SearchRequest, name: &str) -> Result<CrawlResult> {
        let Some(entry) = self.entries.get(name) else {
            bail!("unknown or unavailable source '{name}'");
        };
        Ok(Self::run_entry(
            Arc::clone(&entry.crawler),
            entry.bucket.clone(),
            entry.deadline,
            request.clone(),
        )
        .await)
    }

    /// Fan out over the named sources concurrently. Returns once every leg
    /// completed or hit its deadline, in input order; unknown names are
    /// dropped with a warning.
    pub async fn dispatch_parallel(
        &self,
        request: &SearchRequest,
        names: &[&str],
    ) -> Vec<CrawlResult> {
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            let Some(entry) = self.entries.get(name) else {
                tracing::warn!("Skipping unknown source '{name}' in parallel dispatch");
                continue;
            };
            let crawler = Arc::clone(&entry.crawler);
            let bucket = entry.bucket.clone();
            let deadline = entry.deadline;
            let request = request.clone();
            let source = entry.crawler.declared_source();
            let handle = tokio::spawn(Self::run_entry(crawler, bucket, deadline, request));
            handles.push((source, handle));
        }

        let joined = join_all(handles.into_iter().map(|(source, handle)| async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    tracing::error!("Crawl task panicked: {join_err}");
                    CrawlResult::failure(source, format!("crawl task panicked: {join_err}"), 0)
                }
            }
        }))
        .await;
        joined
    }

    /// Fan out over every available source, then merge.
    pub async fn dispatch_pipeline(&self, request: &SearchRequest) -> Vec<NormalizedFlight> {
        let names = self.available_sources();
        let results = self.dispatch_parallel(request, &names).await;
        merge_results(&results)
    }

    async fn run_entry(
        crawler: Arc<dyn SourceCrawler>,
        bucket: TokenBucket,
        default_deadline: Duration,
        request: SearchRequest,
    ) -> CrawlResult {
        let mut task = CrawlTask::new(request, crawler.declared_source());
        let deadline = task.deadline().unwrap_or(default_deadline);
        task.deadline_secs = Some(deadline.as_secs());

        bucket.acquire().await;

        match tokio::time::timeout(deadline, crawler.crawl(&task)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("{} hit dispatch deadline of {deadline:?}", crawler.name());
                crawler.close().await;
                CrawlResult::failure(
                    crawler.declared_source(),
                    format!("timeout after {deadline:?}"),
                    deadline.as_millis() as u64,
                )
            }
        }
    }

    /// Probe every adapter. The aggregate is healthy only if all are.
    pub async fn health_all(&self) -> Vec<(&'static str, bool)> {
        let probes = self.order.iter().map(|name| {
            let entry = &self.entries[name];
            let crawler = Arc::clone(&entry.crawler);
            async move { (*name, crawler.health_check().await) }
        });
        join_all(probes).await
    }

    pub async fn close_all(&self) {
        join_all(
            self.entries
                .values()
                .map(|entry| entry.crawler.close()),
        )
        .await;
    }
}
