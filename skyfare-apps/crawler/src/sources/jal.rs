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

//! Japan Airlines daily lowest fares via the shared EveryMundo Sputnik
//! tenant `jl`.

use crate::config::Settings;
use crate::contract::SourceCrawler;
use crate::sources::everymundo::{SputnikCrawler, SputnikTenant};

static TENANT: SputnikTenant = SputnikTenant {
    tenant: "jl",
    airline_code: "JL",
    airline_name: "Japan Airlines",
    referer: "https://www.jal.co.jp/jp/en/",
    origin_header: "https://www.jal.co.jp",
};

pub fn build(settings: &Settings) -> anyhow::Result<Box<dyn SourceCrawler>> {
    Ok(Box::new(SputnikCrawler::new("jal", &TENANT, settings)))
}
