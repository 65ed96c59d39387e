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

// Multi-source flight-fare crawler: parallel crawl, normalize, merge,
// score, store.

pub mod config;
pub mod contract;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod schemas;
pub mod sources;
pub mod tasks;
pub mod transport;

// Re-export the types that make up the public surface of the pipeline.
pub use contract::{FallbackCrawler, SourceCrawler};
pub use dispatcher::Dispatcher;
pub use error::{CrawlError, FetchResult};
pub use pipeline::{
    FlightScorer, FlightStore, PreferenceConfig, Priority, ScoreBreakdown, SeatSpec,
    SeatSpecTable, apply_filter, merge_results,
};
pub use schemas::{
    CabinClass, CrawlResult, CrawlTask, DataSource, NormalizedFlight, NormalizedPrice,
    PassengerMix, SearchRequest, TripType, synthetic_flight_number,
};
pub use tasks::{StoreSummary, crawl_parallel, crawl_single, merge_and_store};
