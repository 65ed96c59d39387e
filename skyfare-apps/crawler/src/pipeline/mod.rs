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

//! # Result Pipeline
//!
//! Post-crawl processing: merge duplicate flights across sources, filter
//! against hard preferences, score the survivors, persist.

pub mod merger;
pub mod preference_filter;
pub mod scorer;
pub mod store;

pub use merger::merge_results;
pub use preference_filter::{PreferenceConfig, apply_filter};
pub use scorer::{FlightScorer, Priority, ScoreBreakdown, SeatSpec, SeatSpecTable};
pub use store::FlightStore;
