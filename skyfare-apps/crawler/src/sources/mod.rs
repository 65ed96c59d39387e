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

//! # Source Adapters
//!
//! One module per upstream source, all implementing [`SourceCrawler`]. The
//! registry below is the single place a source is declared: name, transport
//! layer (which picks rate limit and deadline defaults), and constructor.
//! Constructors fail when required credentials are missing; the dispatcher
//! drops those adapters and keeps the rest of the fleet.

pub mod air_busan;
pub mod air_france_klm;
pub mod air_nz;
pub mod air_premia;
pub mod air_seoul;
pub mod amadeus_gds;
pub mod ana;
pub mod cathay_pacific;
pub mod eastar_jet;
pub mod emirates;
pub mod ethiopian_airlines;
pub mod eva_air;
pub mod google;
pub mod hainan_airlines;
pub mod jal;
pub mod jeju_air;
pub mod jin_air;
pub mod kiwi;
pub mod lot_polish;
pub mod lufthansa_group;
pub mod malaysia_airlines;
pub mod philippine_airlines;
pub mod qatar_airways;
pub mod singapore_airlines;
pub mod thai_airways;
pub mod turkish_airlines;
pub mod tway_air;
pub mod vietnam_airlines;

pub(crate) mod everymundo;
pub(crate) mod normalize;

use std::time::Duration;

use anyhow::Result;

use crate::config::Settings;
use crate::contract::SourceCrawler;

/// Transport layer a source primarily runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    L1,
    L2,
    L3,
}

impl Layer {
    pub fn rate_per_min(&self, settings: &Settings) -> u32 {
        match self {
            Layer::L1 => settings.l1_rate_per_min,
            Layer::L2 => settings.l2_rate_per_min,
            Layer::L3 => settings.l3_rate_per_min,
        }
    }

    /// Dispatch deadline: twice the HTTP timeout for L1/L2 (leaves room for
    /// warm-up plus one retry), the full browser timeout for L3.
    pub fn default_deadline(&self, settings: &Settings) -> Duration {
        match self {
            Layer::L1 => Duration::from_secs(settings.l1_timeout * 2),
            Layer::L2 => Duration::from_secs(settings.l2_timeout * 2),
            Layer::L3 => Duration::from_secs(settings.l3_timeout),
        }
    }
}

type BuildFn = fn(&Settings) -> Result<Box<dyn SourceCrawler>>;

pub struct SourceSpec {
    pub name: &'static str,
    pub layer: Layer,
    pub build: BuildFn,
}

macro_rules! spec {
    ($name:literal, $layer:expr, $module:ident) => {
        SourceSpec {
            name: $name,
            layer: $layer,
            build: $module::build,
        }
    };
}

static REGISTRY: &[SourceSpec] = &[
    spec!("google", Layer::L2, google),
    spec!("kiwi", Layer::L1, kiwi),
    spec!("amadeus_gds", Layer::L1, amadeus_gds),
    spec!("lufthansa_group", Layer::L1, lufthansa_group),
    spec!("singapore_airlines", Layer::L1, singapore_airlines),
    spec!("turkish_airlines", Layer::L3, turkish_airlines),
    spec!("air_busan", Layer::L2, air_busan),
    spec!("air_seoul", Layer::L3, air_seoul),
    spec!("air_premia", Layer::L2, air_premia),
    spec!("thai_airways", Layer::L2, thai_airways),
    spec!("cathay_pacific", Layer::L2, cathay_pacific),
    spec!("jeju_air", Layer::L2, jeju_air),
    spec!("jin_air", Layer::L1, jin_air),
    spec!("tway_air", Layer::L2, tway_air),
    spec!("eastar_jet", Layer::L2, eastar_jet),
    spec!("jal", Layer::L2, jal),
    spec!("ana", Layer::L3, ana),
    spec!("air_france_klm", Layer::L2, air_france_klm),
    spec!("air_nz", Layer::L2, air_nz),
    spec!("eva_air", Layer::L2, eva_air),
    spec!("lot_polish", Layer::L2, lot_polish),
    spec!("emirates", Layer::L2, emirates),
    spec!("ethiopian_airlines", Layer::L2, ethiopian_airlines),
    spec!("hainan_airlines", Layer::L1, hainan_airlines),
    spec!("malaysia_airlines", Layer::L2, malaysia_airlines),
    spec!("philippine_airlines", Layer::L1, philippine_airlines),
    spec!("qatar_airways", Layer::L3, qatar_airways),
    spec!("vietnam_airlines", Layer::L2, vietnam_airlines),
];

pub fn registry() -> &'static [SourceSpec] {
    REGISTRY
}

pub fn all_names() -> Vec<&'static str> {
    REGISTRY.iter().map(|s| s.name).collect()
}

pub fn spec(name: &str) -> Option<&'static SourceSpec> {
    REGISTRY.iter().find(|s| s.name == name)
}

pub fn build(name: &str, settings: &Settings) -> Result<Box<dyn SourceCrawler>> {
    let Some(spec) = spec(name) else {
        anyhow::bail!("unknown source '{name}'");
    };
    (spec.build)(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_are_unique() {
        let mut names = all_names();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
        assert!(before >= 25, "expected a full fleet, got {before}");
    }

    #[test]
    fn unknown_source_is_an_error() {
        let settings = Settings::from_env();
        assert!(build("definitely_not_a_source", &settings).is_err());
    }
}
