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

//! # Orchestration Tasks
//!
//! The long-running task shapes dispatched via the external work queue.
//! Payloads and summaries are serde-serializable so any broker transport
//! can carry them; the queue itself is not this crate's concern. Crawl
//! tasks are idempotent (every run hits the upstream again); the store
//! side is append-only.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;
use crate::pipeline::{FlightStore, merge_results};
use crate::schemas::{CrawlResult, DataSource, SearchRequest};

/// Outcome of a merge-and-store round, reported back through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSummary {
    pub stored_count: u64,
    pub merged_count: usize,
    pub sources: Vec<DataSource>,
    pub timestamp: DateTime<Utc>,
}

/// Per-source fan-out leaf.
pub async fn crawl_single(
    dispatcher: &Dispatcher,
    source_name: &str,
    request: SearchRequest,
) -> Result<CrawlResult> {
    dispatcher.dispatch_single(&request, source_name).await
}

/// Chord callback: merge the collected envelopes and persist the result.
pub async fn merge_and_store(
    results: Vec<CrawlResult>,
    store: &FlightStore,
) -> Result<StoreSummary> {
    let merged = merge_results(&results);
    let stored_count = store.store_flights(&merged).await?;

    let summary = StoreSummary {
        stored_count,
        merged_count: merged.len(),
        sources: results.iter().map(|r| r.source).collect(),
        timestamp: Utc::now(),
    };
    tracing::info!(
        "merge_and_store: {} merged, {} stored from {} sources",
        summary.merged_count,
        summary.stored_count,
        summary.sources.len()
    );
    Ok(summary)
}

/// Fan out over every available source, then run the merge-and-store
/// callback over the full result group.
pub async fn crawl_parallel(
    dispatcher: &Dispatcher,
    store: &FlightStore,
    request: SearchRequest,
) -> Result<StoreSummary> {
    let names = dispatcher.available_sources();
    let results = dispatcher.dispatch_parallel(&request, &names).await;
    merge_and_store(results, store).await
}
