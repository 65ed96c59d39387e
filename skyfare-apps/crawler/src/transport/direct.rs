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

//! # L1 Transport — Plain HTTP
//!
//! Long-lived client without TLS emulation, for endpoints that accept
//! ordinary programmatic access (developer APIs, public fare buckets).

use std::time::Duration;

use serde_json::Value;

use crate::config::settings;
use crate::error::{CrawlError, FetchResult};

#[derive(Debug, Clone)]
pub struct DirectClient {
    client: wreq::Client,
}

impl DirectClient {
    pub fn new(timeout_secs: u64) -> FetchResult<Self> {
        let mut builder = wreq::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.min(10)));
        if let Some(proxy_url) = &settings().l1_proxy_url {
            let proxy = wreq::Proxy::all(proxy_url)
                .map_err(|e| CrawlError::Transport(format!("bad proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| CrawlError::Transport(format!("client build failed: {e}")))?;
        Ok(Self { client })
    }

    /// Underlying client, for adapters with bespoke request shapes
    /// (token grants, signed URLs).
    pub fn inner(&self) -> &wreq::Client {
        &self.client
    }

    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, String)],
    ) -> FetchResult<String> {
        let mut req = self.client.get(url).query(query);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        Self::read_body(req.send().await?).await
    }

    pub async fn post_form(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        form: &[(&str, String)],
    ) -> FetchResult<String> {
        let mut req = self.client.post(url).form(form);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        Self::read_body(req.send().await?).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> FetchResult<String> {
        let mut req = self.client.post(url).json(body);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        Self::read_body(req.send().await?).await
    }

    pub(crate) async fn read_body(response: wreq::Response) -> FetchResult<String> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::Transport(format!("read body: {e}")))?;
        if !(200..300).contains(&status) {
            return Err(CrawlError::from_status(status, &body));
        }
        Ok(body)
    }
}
