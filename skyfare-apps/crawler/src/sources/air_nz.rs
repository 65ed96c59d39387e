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

//! Air New Zealand daily lowest fares via the shared EveryMundo Sputnik
//! tenant `nz`.

use crate::config::Settings;
use crate::contract::SourceCrawler;
use crate::sources::everymundo::{SputnikCrawler, SputnikTenant};

static TENANT: SputnikTenant = SputnikTenant {
    tenant: "nz",
    airline_code: "NZ",
    airline_name: "Air New Zealand",
    referer: "https://www.airnewzealand.co.nz/flights/en-nz/",
    origin_header: "https://www.airnewzealand.co.nz",
};

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(SputnikCrawler::new("air_nz", &TENANT, settings)))
}
