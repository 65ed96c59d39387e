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

//! # L3 Transport — Browser Automation
//!
//! Drives a headless Chrome through chromedriver. Each adapter declares a
//! [`BrowserFlow`]: entry URL, stealth patches, post-load steps, form fill,
//! search trigger, and the URL patterns whose response bodies constitute
//! results. Interception works by wrapping `fetch` and `XMLHttpRequest` in
//! the page before triggering the search and polling the captured buffer.
//!
//! Two hard-won rules are encoded here rather than in adapters:
//!
//! - Consent overlays are disabled with `pointer-events: none`, never
//!   removed. Removing the node crashes the host SPA's component tree.
//! - Calendars that auto-open after a prior field are not clicked again;
//!   adapters express that with [`FlowStep::WaitFor`] instead of a click.
//!
//! [`BrowserSession::page_fetch`] executes a fetch inside the loaded page,
//! for WAFs that bind the clearance cookie to the browser's TLS fingerprint.

use std::time::Duration;

use serde_json::{Value, json};
use thirtyfour::{By, ChromiumLikeCapabilities, DesiredCapabilities, WebDriver};

use crate::config::settings;
use crate::error::{CrawlError, FetchResult};

/// Anti-detection patches applied before any site script runs.
const STEALTH_JS: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', {
    get: () => ['en-US', 'en', 'ko-KR', 'ko'],
});
window.chrome = window.chrome || { runtime: {} };
"#;

/// Hook installed before the search trigger. Captures fetch/XHR response
/// bodies whose URL contains any declared pattern.
const CAPTURE_HOOK_JS: &str = r#"
(function (patterns) {
    if (window.__sf_captured) { return; }
    window.__sf_captured = [];
    const matches = (url) => patterns.some((p) => url.includes(p));
    const push = (url, body) => {
        try { window.__sf_captured.push({ url: url, body: body }); } catch (e) {}
    };
    const origFetch = window.fetch;
    window.fetch = async function (...args) {
        const resp = await origFetch.apply(this, args);
        const url = (typeof args[0] === 'string') ? args[0] : args[0].url;
        if (matches(url)) {
            resp.clone().text().then((body) => push(url, body)).catch(() => {});
        }
        return resp;
    };
    const origOpen = XMLHttpRequest.prototype.open;
    XMLHttpRequest.prototype.open = function (method, url, ...rest) {
        this.__sf_url = url;
        return origOpen.call(this, method, url, ...rest);
    };
    const origSend = XMLHttpRequest.prototype.send;
    XMLHttpRequest.prototype.send = function (...args) {
        if (this.__sf_url && matches(this.__sf_url)) {
            this.addEventListener('load', () => push(this.__sf_url, this.responseText));
        }
        return origSend.apply(this, args);
    };
})(arguments[0]);
"#;

/// In-page fetch escape hatch. Returns `{status, body}`.
const PAGE_FETCH_JS: &str = r#"
const [url, method, body, contentType] = arguments[0];
const done = arguments[arguments.length - 1];
const headers = {
    'X-Requested-With': 'XMLHttpRequest',
    'Accept': 'application/json, text/javascript, */*; q=0.01',
};
if (contentType) { headers['Content-Type'] = contentType; }
fetch(url, { method: method, headers: headers, body: body || undefined })
    .then(async (resp) => done({ status: resp.status, body: await resp.text() }))
    .catch((err) => done({ status: 0, body: String(err) }));
"#;

/// One declarative step of a browser flow.
#[derive(Debug, Clone)]
pub enum FlowStep {
    /// Click the first element matching the CSS selector.
    Click { selector: String },
    /// Clear and type into the first element matching the selector.
    TypeInto { selector: String, text: String },
    /// Send the Enter key to the element (commits comboboxes).
    PressEnter { selector: String },
    /// Disable a blocking overlay without removing it.
    DisableOverlay { selector: String },
    /// Wait until the selector matches a displayed element.
    WaitFor { selector: String, timeout: Duration },
    /// Fixed pause, for SPA animations with no observable end state.
    Sleep(Duration),
    /// Arbitrary script, for site-specific oddities.
    Script(String),
}

impl FlowStep {
    pub fn click(selector: impl Into<String>) -> Self {
        FlowStep::Click {
            selector: selector.into(),
        }
    }

    pub fn type_into(selector: impl Into<String>, text: impl Into<String>) -> Self {
        FlowStep::TypeInto {
            selector: selector.into(),
            text: text.into(),
        }
    }

    pub fn press_enter(selector: impl Into<String>) -> Self {
        FlowStep::PressEnter {
            selector: selector.into(),
        }
    }

    pub fn disable_overlay(selector: impl Into<String>) -> Self {
        FlowStep::DisableOverlay {
            selector: selector.into(),
        }
    }

    pub fn wait_for(selector: impl Into<String>, timeout: Duration) -> Self {
        FlowStep::WaitFor {
            selector: selector.into(),
            timeout,
        }
    }
}

/// Everything an L3 adapter declares about its site.
#[derive(Debug, Clone)]
pub struct BrowserFlow {
    pub entry_url: String,
    /// Extra stealth/setup scripts executed right after navigation.
    pub init_scripts: Vec<String>,
    /// Consent dismissal and similar steps, run after load.
    pub post_load: Vec<FlowStep>,
    /// Origin/destination/date/cabin form sequence.
    pub form_fill: Vec<FlowStep>,
    /// The action that fires the search request.
    pub trigger: Vec<FlowStep>,
    /// URL fragments whose response bodies are the results.
    pub capture_patterns: Vec<String>,
    /// How long to await the first matching response.
    pub capture_timeout: Duration,
}

/// A headless browser owned by a single crawl call.
pub struct BrowserSession {
    driver: WebDriver,
}

impl BrowserSession {
    pub async fn launch() -> FetchResult<Self> {
        let mut caps = DesiredCapabilities::chrome();
        for arg in [
            "--headless=new",
            "--disable-blink-features=AutomationControlled",
            "--no-sandbox",
            "--window-size=1366,900",
        ] {
            caps.add_arg(arg)
                .map_err(|e| CrawlError::Transport(format!("chrome caps: {e}")))?;
        }
        let driver = WebDriver::new(&settings().webdriver_url, caps)
            .await
            .map_err(|e| CrawlError::Transport(format!("webdriver connect: {e}")))?;
        Ok(Self { driver })
    }

    /// Navigate, prepare, fill, trigger, then await the first captured
    /// response body matching the flow's URL patterns.
    pub async fn run_flow(&self, flow: &BrowserFlow) -> FetchResult<Vec<String>> {
        self.driver
            .goto(&flow.entry_url)
            .await
            .map_err(|e| CrawlError::Transport(format!("goto {}: {e}", flow.entry_url)))?;

        self.execute(STEALTH_JS, Vec::new()).await?;
        for script in &flow.init_scripts {
            self.execute(script, Vec::new()).await?;
        }
        for step in &flow.post_load {
            self.run_step(step).await?;
        }

        // Hook must be in place before the trigger fires the request.
        self.execute(CAPTURE_HOOK_JS, vec![json!(flow.capture_patterns)])
            .await?;

        for step in &flow.form_fill {
            self.run_step(step).await?;
        }
        for step in &flow.trigger {
            self.run_step(step).await?;
        }

        self.await_captures(flow.capture_timeout).await
    }

    async fn await_captures(&self, timeout: Duration) -> FetchResult<Vec<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let captured = self
                .execute(
                    "return (window.__sf_captured || []).map((c) => c.body);",
                    Vec::new(),
                )
                .await?;
            if let Value::Array(bodies) = &captured {
                if !bodies.is_empty() {
                    return Ok(bodies
                        .iter()
                        .filter_map(|b| b.as_str().map(str::to_string))
                        .collect());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrawlError::Timeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn run_step(&self, step: &FlowStep) -> FetchResult<()> {
        match step {
            FlowStep::Click { selector } => {
                let el = self.find(selector).await?;
                el.click()
                    .await
                    .map_err(|e| CrawlError::Transport(format!("click {selector}: {e}")))?;
            }
            FlowStep::TypeInto { selector, text } => {
                let el = self.find(selector).await?;
                let _ = el.clear().await;
                el.send_keys(text)
                    .await
                    .map_err(|e| CrawlError::Transport(format!("type {selector}: {e}")))?;
            }
            FlowStep::PressEnter { selector } => {
                let el = self.find(selector).await?;
                // WebDriver keycode for Enter.
                el.send_keys("\u{E007}")
                    .await
                    .map_err(|e| CrawlError::Transport(format!("enter {selector}: {e}")))?;
            }
            FlowStep::DisableOverlay { selector } => {
                // pointer-events only; removing the node breaks SPA reactivity.
                let script = format!(
                    "document.querySelectorAll('{selector}').forEach((el) => {{ \
                         el.style.pointerEvents = 'none'; el.style.opacity = '0.2'; }});"
                );
                self.execute(&script, Vec::new()).await?;
            }
            FlowStep::WaitFor { selector, timeout } => {
                let deadline = tokio::time::Instant::now() + *timeout;
                loop {
                    if let Ok(el) = self.driver.find(By::Css(selector.as_str())).await {
                        if el.is_displayed().await.unwrap_or(false) {
                            break;
                        }
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CrawlError::Timeout(*timeout));
                    }
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
            FlowStep::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
            }
            FlowStep::Script(script) => {
                self.execute(script, Vec::new()).await?;
            }
        }
        Ok(())
    }

    async fn find(&self, selector: &str) -> FetchResult<thirtyfour::WebElement> {
        self.driver
            .find(By::Css(selector))
            .await
            .map_err(|e| CrawlError::Transport(format!("find {selector}: {e}")))
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> FetchResult<Value> {
        let ret = self
            .driver
            .execute(script, args)
            .await
            .map_err(|e| CrawlError::Transport(format!("script: {e}")))?;
        Ok(ret.json().clone())
    }

    /// Fetch from inside the page so the request rides the browser's TLS
    /// stack and cookies. Used when `cf_clearance` is fingerprint-bound.
    pub async fn page_fetch(
        &self,
        url: &str,
        method: &str,
        body: Option<&str>,
        content_type: Option<&str>,
    ) -> FetchResult<(u16, String)> {
        let args = vec![json!([url, method, body, content_type])];
        let ret = self
            .driver
            .execute_async(PAGE_FETCH_JS, args)
            .await
            .map_err(|e| CrawlError::Transport(format!("page fetch: {e}")))?;
        let value = ret.json();
        let status = value
            .get("status")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u16;
        let body = value
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if status == 0 {
            return Err(CrawlError::Transport(format!("in-page fetch failed: {body}")));
        }
        Ok((status, body))
    }

    /// Current page HTML, for adapters that scrape rendered DOM.
    pub async fn page_source(&self) -> FetchResult<String> {
        self.driver
            .source()
            .await
            .map_err(|e| CrawlError::Transport(format!("page source: {e}")))
    }

    /// Close the browser. Safe to call once; sessions are never shared.
    pub async fn close(self) -> FetchResult<()> {
        self.driver
            .quit()
            .await
            .map_err(|e| CrawlError::Transport(format!("quit: {e}")))
    }
}
