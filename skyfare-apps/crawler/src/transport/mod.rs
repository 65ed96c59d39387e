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

//! # HTTP Transport Layer
//!
//! Three access strategies, picked by each source adapter per endpoint:
//!
//! - [`direct`] (L1): plain client for open endpoints.
//! - [`impersonate`] (L2): browser-like TLS fingerprint, fresh client per
//!   request, optional warm-up requests to seed anti-bot cookies.
//! - [`browser`] (L3): full browser automation with response interception,
//!   for endpoints only reachable from the host SPA's context.

pub mod browser;
pub mod direct;
pub mod impersonate;

pub use browser::{BrowserFlow, BrowserSession, FlowStep};
pub use direct::DirectClient;
pub use impersonate::ImpersonateClient;
