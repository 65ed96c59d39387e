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

//! # Crawl Error Taxonomy
//!
//! One error kind per upstream failure class, with a single
//! [`CrawlError::is_retryable`] decision point consumed by the retry policy.
//! Response-shape failures are deliberately non-retryable: a schema
//! regression should surface as a typed parse error, not burn retries.

use std::time::Duration;

use thiserror::Error;

pub type FetchResult<T> = std::result::Result<T, CrawlError>;

#[derive(Debug, Error)]
pub enum CrawlError {
    /// Connect failure, TLS handshake failure, read/write error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status other than the specifically classified ones.
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus { status: u16, body_preview: String },

    /// HTTP 429.
    #[error("rate limited by upstream (HTTP 429)")]
    RateLimited,

    /// 403 plus a site-specific challenge marker. Retry re-warms the
    /// session (L2) or resets the browser (L3).
    #[error("anti-bot challenge: {0}")]
    AntiBot(String),

    /// 401 on a token-bearing request; clients refresh and re-attempt once
    /// before this counts as a retry.
    #[error("authentication expired")]
    AuthExpired,

    /// JSON decode failure, missing required field, declared GraphQL errors.
    #[error("response shape mismatch: {0}")]
    ResponseShape(String),

    /// Documented upstream error code/message, surfaced verbatim.
    #[error("upstream advisory: {0}")]
    UpstreamAdvisory(String),

    /// Deadline expired. The message must keep the word "timeout": the
    /// dispatcher and operators grep for it in failed envelopes.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Required credentials absent from the environment; the adapter fails
    /// construction and stays out of the rotation.
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
}

impl CrawlError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CrawlError::Transport(_)
            | CrawlError::RateLimited
            | CrawlError::AntiBot(_)
            | CrawlError::AuthExpired
            | CrawlError::Timeout(_) => true,
            CrawlError::HttpStatus { status, .. } => *status >= 500,
            CrawlError::ResponseShape(_)
            | CrawlError::UpstreamAdvisory(_)
            | CrawlError::MissingCredentials(_) => false,
        }
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => CrawlError::RateLimited,
            401 => CrawlError::AuthExpired,
            403 if looks_like_challenge(body) => {
                CrawlError::AntiBot(preview(body, 120))
            }
            _ => CrawlError::HttpStatus {
                status,
                body_preview: preview(body, 200),
            },
        }
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        CrawlError::ResponseShape(msg.into())
    }
}

/// Markers observed across Cloudflare, Akamai, and carrier-specific WAFs.
pub fn looks_like_challenge(body: &str) -> bool {
    body.contains("Just a moment")
        || body.contains("cf-challenge")
        || body.contains("Turnstile")
        || body.contains("_Incapsula_")
        || body.contains("DS-30037")
        || body.contains("Access Denied")
}

fn preview(body: &str, limit: usize) -> String {
    body.chars().take(limit).collect()
}

impl From<wreq::Error> for CrawlError {
    fn from(e: wreq::Error) -> Self {
        if e.is_timeout() {
            CrawlError::Timeout(Duration::ZERO)
        } else {
            CrawlError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CrawlError {
    fn from(e: serde_json::Error) -> Self {
        CrawlError::ResponseShape(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CrawlError::Transport("reset".into()).is_retryable());
        assert!(CrawlError::RateLimited.is_retryable());
        assert!(CrawlError::AuthExpired.is_retryable());
        assert!(CrawlError::AntiBot("turnstile".into()).is_retryable());
        assert!(CrawlError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(
            CrawlError::HttpStatus {
                status: 503,
                body_preview: String::new()
            }
            .is_retryable()
        );
        assert!(
            !CrawlError::HttpStatus {
                status: 400,
                body_preview: String::new()
            }
            .is_retryable()
        );
        assert!(!CrawlError::shape("missing field").is_retryable());
        assert!(!CrawlError::UpstreamAdvisory("date out of range".into()).is_retryable());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            CrawlError::from_status(429, ""),
            CrawlError::RateLimited
        ));
        assert!(matches!(
            CrawlError::from_status(401, ""),
            CrawlError::AuthExpired
        ));
        assert!(matches!(
            CrawlError::from_status(403, "<html>Just a moment...</html>"),
            CrawlError::AntiBot(_)
        ));
        assert!(matches!(
            CrawlError::from_status(403, "forbidden"),
            CrawlError::HttpStatus { status: 403, .. }
        ));
    }

    #[test]
    fn timeout_message_contains_the_word_timeout() {
        let msg = CrawlError::Timeout(Duration::from_secs(30)).to_string();
        assert!(msg.contains("timeout"));
    }
}
