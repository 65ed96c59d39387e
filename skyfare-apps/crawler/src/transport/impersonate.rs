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

//! # L2 Transport — TLS-Impersonating HTTP
//!
//! Same surface as L1 but presenting a real browser's TLS fingerprint and
//! HTTP/2 frame ordering. A fresh client is built for every request so WAFs
//! cannot track a session fingerprint across calls. The optional warm-up
//! sequence GETs anti-bot seed pages first and carries their cookies into
//! the real call.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use wreq::redirect::Policy;
use wreq_util::Emulation;

use crate::error::{CrawlError, FetchResult, looks_like_challenge};

#[derive(Debug, Clone)]
pub struct ImpersonateClient {
    timeout: Duration,
    emulation: Emulation,
}

/// Minimal cookie jar for warm-up flows. The jar only lives for one
/// warm-up + request sequence, matching the fresh-client-per-request rule.
#[derive(Debug, Default)]
struct CookieJar(HashMap<String, String>);

impl CookieJar {
    fn absorb(&mut self, response: &wreq::Response) {
        for value in response.headers().get_all("set-cookie") {
            let Ok(raw) = value.to_str() else { continue };
            let Some(pair) = raw.split(';').next() else { continue };
            if let Some((name, val)) = pair.split_once('=') {
                self.0.insert(name.trim().to_string(), val.trim().to_string());
            }
        }
    }

    fn header(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

pub enum Payload<'a> {
    None,
    Form(&'a [(&'a str, String)]),
    Json(&'a Value),
}

impl ImpersonateClient {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            emulation: Emulation::Chrome131,
        }
    }

    pub fn with_emulation(mut self, emulation: Emulation) -> Self {
        self.emulation = emulation;
        self
    }

    fn fresh_client(&self) -> FetchResult<wreq::Client> {
        wreq::Client::builder()
            .emulation(self.emulation)
            .redirect(Policy::default())
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| CrawlError::Transport(format!("client build failed: {e}")))
    }

    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        warmup: &[&str],
    ) -> FetchResult<String> {
        self.request(wreq::Method::GET, url, headers, Payload::None, warmup)
            .await
    }

    pub async fn get_with_query(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, String)],
        warmup: &[&str],
    ) -> FetchResult<String> {
        let mut full = String::from(url);
        for (i, (name, value)) in query.iter().enumerate() {
            full.push(if i == 0 { '?' } else { '&' });
            full.push_str(name);
            full.push('=');
            full.push_str(&urlencoding::encode(value));
        }
        self.request(wreq::Method::GET, &full, headers, Payload::None, warmup)
            .await
    }

    pub async fn post_form(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        form: &[(&str, String)],
        warmup: &[&str],
    ) -> FetchResult<String> {
        self.request(wreq::Method::POST, url, headers, Payload::Form(form), warmup)
            .await
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
        warmup: &[&str],
    ) -> FetchResult<String> {
        self.request(wreq::Method::POST, url, headers, Payload::Json(body), warmup)
            .await
    }

    /// Two-step session flow in one fresh client: GET `session_url` (its
    /// body usually carries a CSRF token), then POST the form with the
    /// session's cookies. Returns `(session_body, response_body)`.
    pub async fn session_then_post_form(
        &self,
        session_url: &str,
        url: &str,
        headers: &[(&str, &str)],
        form: &[(&str, String)],
        extra_headers: impl FnOnce(&str) -> Vec<(String, String)> + Send,
    ) -> FetchResult<(String, String)> {
        let client = self.fresh_client()?;
        let mut jar = CookieJar::default();

        let resp = client.get(session_url).send().await?;
        jar.absorb(&resp);
        let status = resp.status().as_u16();
        let session_body = resp
            .text()
            .await
            .map_err(|e| CrawlError::Transport(format!("read session body: {e}")))?;
        if !(200..300).contains(&status) || looks_like_challenge(&session_body) {
            return Err(CrawlError::AntiBot(format!(
                "session page blocked (HTTP {status})"
            )));
        }

        let mut req = client.post(url).form(form);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        for (name, value) in extra_headers(&session_body) {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = jar.header() {
            req = req.header("Cookie", cookie);
        }
        let response = req.send().await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::Transport(format!("read body: {e}")))?;
        if !(200..300).contains(&status) {
            return Err(CrawlError::from_status(status, &body));
        }
        Ok((session_body, body))
    }

    /// One fresh-client round trip: warm-up GETs (cookies carried forward),
    /// then the target call. Challenge markers in a 2xx body still fail the
    /// call as [`CrawlError::AntiBot`] so the retry layer re-warms from
    /// scratch with a brand-new fingerprint.
    pub async fn request(
        &self,
        method: wreq::Method,
        url: &str,
        headers: &[(&str, &str)],
        payload: Payload<'_>,
        warmup: &[&str],
    ) -> FetchResult<String> {
        let client = self.fresh_client()?;
        let mut jar = CookieJar::default();

        for warmup_url in warmup {
            tracing::debug!("L2 warm-up GET {warmup_url}");
            let mut req = client.get(*warmup_url);
            if let Some(cookie) = jar.header() {
                req = req.header("Cookie", cookie);
            }
            let resp = req.send().await?;
            jar.absorb(&resp);
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            if status == 403 || looks_like_challenge(&body) {
                return Err(CrawlError::AntiBot(format!(
                    "warm-up blocked at {warmup_url} (HTTP {status})"
                )));
            }
        }

        let mut req = client.request(method, url);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        if let Some(cookie) = jar.header() {
            req = req.header("Cookie", cookie);
        }
        req = match payload {
            Payload::None => req,
            Payload::Form(form) => req.form(form),
            Payload::Json(json) => req.json(json),
        };

        let response = req.send().await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::Transport(format!("read body: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(CrawlError::from_status(status, &body));
        }
        if looks_like_challenge(&body) {
            return Err(CrawlError::AntiBot("challenge marker in 2xx body".into()));
        }
        Ok(body)
    }
}
