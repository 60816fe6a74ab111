//! Chromium-backed automation of the Debrid Media Manager UI.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    AutomationSurface, LibraryStats, SearchCandidate, SearchTarget, SurfaceError, SurfaceFactory,
};
use crate::config::BrowserConfig;
use crate::credential::Credential;
use crate::request::MediaKind;

const CARD_ATTR: &str = "data-seerrbridge-index";
const INSTANT_LABEL: &str = "Instant RD";
const DOWNLOAD_LABEL: &str = "DL with RD";
const READY_LABEL: &str = "RD (100%)";
const SHOW_MORE_LABEL: &str = "Show More Results";
const LIBRARY_PATH: &str = "/library";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(TB|GB|MB)\b").expect("valid size regex"));
static FILES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s+files?\b").expect("valid file count regex"));
static TORRENTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d[\d,]*)\s+torrents?\b").expect("valid torrent count regex"));
static LIBRARY_TB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*TB\b").expect("valid library size regex"));

/// Text of the library page heading, e.g. "Library 💾 1,204 torrents 📦 38.7 TB".
const LIBRARY_HEADING_SCRIPT: &str = r#"(() => {
  const heading = Array.from(document.querySelectorAll('h1'))
    .find((h) => (h.innerText || '').includes('Library'));
  return heading ? heading.innerText.trim() : null;
})()"#;

const COLLECT_SCRIPT: &str = r#"(() => {
  const cards = Array.from(document.querySelectorAll('div.border-black'));
  return cards.map((card, index) => {
    card.setAttribute('data-seerrbridge-index', String(index));
    const heading = card.querySelector('h2');
    const buttons = Array.from(card.querySelectorAll('button'))
      .map((b) => (b.innerText || '').trim());
    return {
      index,
      title: heading ? heading.innerText.trim() : '',
      text: card.innerText || '',
      buttons,
    };
  });
})()"#;

/// Raw card data scraped from the result list.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawCard {
    pub index: usize,
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub buttons: Vec<String>,
}

/// Turn a scraped card into a candidate; cards without a title or a size are dropped.
pub(crate) fn parse_card(card: RawCard) -> Option<SearchCandidate> {
    if card.title.is_empty() {
        return None;
    }
    let size_bytes = parse_size(&card.text)?;
    let file_count = FILES_RE
        .captures(&card.text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());

    Some(SearchCandidate {
        index: card.index,
        title: card.title,
        size_bytes,
        file_count,
        cached: card.buttons.iter().any(|b| b.contains(INSTANT_LABEL)),
        in_library: card.buttons.iter().any(|b| b.starts_with(READY_LABEL)),
    })
}

fn parse_size(text: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_ascii_uppercase();
    let factor = match unit.as_str() {
        "TB" => 1024f64.powi(4),
        "GB" => 1024f64.powi(3),
        _ => 1024f64.powi(2),
    };
    Some((value * factor) as u64)
}

/// Torrent count and size from the library heading; None when it shows neither.
pub(crate) fn parse_library_heading(text: &str) -> Option<(u64, f64)> {
    let torrents = TORRENTS_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok());
    let size = LIBRARY_TB_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());
    if torrents.is_none() && size.is_none() {
        return None;
    }
    Some((torrents.unwrap_or(0), size.unwrap_or(0.0)))
}

/// URL of the search view for a target.
pub(crate) fn target_url(base_url: &str, target: &SearchTarget) -> String {
    let base = base_url.trim_end_matches('/');
    match (&target.imdb_id, target.kind) {
        (Some(imdb), MediaKind::Movie) => format!("{}/movie/{}", base, imdb),
        (Some(imdb), MediaKind::Show) => {
            format!("{}/show/{}/{}", base, imdb, target.season.unwrap_or(1))
        }
        (None, _) => format!(
            "{}/search?query={}",
            base,
            urlencoding::encode(&target.query())
        ),
    }
}

/// Script that stores the provider credential where the UI reads it.
pub(crate) fn storage_script(credential: &Credential) -> String {
    let access = json!({
        "value": credential.access_token,
        "expiry": credential.expiry.timestamp_millis(),
    })
    .to_string();
    let entries = [
        ("rd:accessToken", access),
        ("rd:refreshToken", json!(credential.refresh_token).to_string()),
        ("rd:clientId", json!(credential.client_id).to_string()),
        ("rd:clientSecret", json!(credential.client_secret).to_string()),
    ];

    let mut script = String::from("(() => {\n");
    for (key, value) in entries {
        script.push_str(&format!(
            "  localStorage.setItem({}, {});\n",
            json!(key),
            json!(value)
        ));
    }
    script.push_str("  return true;\n})()");
    script
}

fn click_script(candidate: &SearchCandidate) -> String {
    format!(
        r#"((index, title) => {{
  const cards = Array.from(document.querySelectorAll('div.border-black'));
  let card = cards.find((c) => c.getAttribute('{attr}') === String(index));
  const heading = card ? card.querySelector('h2') : null;
  if (!heading || heading.innerText.trim() !== title) {{
    card = cards.find((c) => {{
      const h = c.querySelector('h2');
      return h && h.innerText.trim() === title;
    }});
  }}
  if (!card) return null;
  const buttons = Array.from(card.querySelectorAll('button'));
  const pick = buttons.find((b) => (b.innerText || '').includes({instant}))
    || buttons.find((b) => (b.innerText || '').includes({download}));
  if (!pick) return null;
  pick.click();
  return (pick.innerText || '').trim();
}})({index}, {title})"#,
        attr = CARD_ATTR,
        instant = json!(INSTANT_LABEL),
        download = json!(DOWNLOAD_LABEL),
        index = candidate.index,
        title = json!(candidate.title),
    )
}

fn ready_script(candidate: &SearchCandidate) -> String {
    format!(
        r#"((title) => {{
  const cards = Array.from(document.querySelectorAll('div.border-black'));
  const card = cards.find((c) => {{
    const h = c.querySelector('h2');
    return h && h.innerText.trim() === title;
  }});
  if (!card) return false;
  return Array.from(card.querySelectorAll('button'))
    .some((b) => (b.innerText || '').trim().startsWith({ready}));
}})({title})"#,
        ready = json!(READY_LABEL),
        title = json!(candidate.title),
    )
}

fn show_more_script() -> String {
    format!(
        r#"(() => {{
  const button = Array.from(document.querySelectorAll('button'))
    .find((b) => (b.innerText || '').includes({label}));
  if (!button) return false;
  button.click();
  return true;
}})()"#,
        label = json!(SHOW_MORE_LABEL),
    )
}

/// Launches Chromium surfaces from the `[browser]` configuration.
pub struct ChromiumSurfaceFactory {
    config: BrowserConfig,
}

impl ChromiumSurfaceFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn chromium_config(&self) -> Result<ChromiumConfig, SurfaceError> {
        let mut builder = ChromiumConfig::builder()
            .request_timeout(Duration::from_secs(self.config.step_timeout_secs));

        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(ref executable) = self.config.executable {
            builder = builder.chrome_executable(executable);
        }

        builder = builder.args(vec![
            "--disable-gpu".to_string(),
            "--no-first-run".to_string(),
            "--disable-extensions".to_string(),
            "--window-size=1366,768".to_string(),
        ]);

        builder.build().map_err(SurfaceError::Launch)
    }
}

#[async_trait]
impl SurfaceFactory for ChromiumSurfaceFactory {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn launch(&self) -> Result<Box<dyn AutomationSurface>, SurfaceError> {
        let chromium_config = self.chromium_config()?;
        info!(headless = self.config.headless, "Launching Chromium surface");

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|e| SurfaceError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Chromium handler reported error");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(SurfaceError::Launch(e.to_string()));
            }
        };

        Ok(Box::new(ChromiumSurface {
            browser,
            page,
            handler_task: Some(handler_task),
            base_url: self.config.base_url.clone(),
            show_more_clicks: self.config.show_more_clicks,
            results_wait: Duration::from_secs(self.config.step_timeout_secs.max(2) / 2),
            current_url: None,
            injected_token: None,
        }))
    }
}

/// One Chromium instance with a single working tab.
pub struct ChromiumSurface {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
    base_url: String,
    show_more_clicks: u32,
    results_wait: Duration,
    current_url: Option<String>,
    /// Access token last written into the page's storage.
    injected_token: Option<String>,
}

impl ChromiumSurface {
    async fn goto(&mut self, url: &str) -> Result<(), SurfaceError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| SurfaceError::Navigation(format!("{}: {}", url, e)))?;
        self.page.wait_for_navigation().await?;
        self.current_url = Some(url.to_string());
        Ok(())
    }

    async fn collect_cards(&self) -> Result<Vec<RawCard>, SurfaceError> {
        self.page
            .evaluate(COLLECT_SCRIPT)
            .await
            .map_err(|e| SurfaceError::Script(format!("collect results: {}", e)))?
            .into_value()
            .map_err(|e| SurfaceError::Script(format!("parse results: {}", e)))
    }

    async fn eval_bool(&self, script: &str) -> Result<bool, SurfaceError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| SurfaceError::Script(e.to_string()))?
            .into_value::<bool>()
            .map_err(|e| SurfaceError::Script(e.to_string()))
    }

    /// Wait for the result list to render, then expand it.
    async fn load_results(&self) -> Result<Vec<RawCard>, SurfaceError> {
        let deadline = tokio::time::Instant::now() + self.results_wait;
        let mut cards = self.collect_cards().await?;
        while cards.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
            cards = self.collect_cards().await?;
        }

        let show_more = show_more_script();
        for _ in 0..self.show_more_clicks {
            if !self.eval_bool(&show_more).await? {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL * 2).await;
        }

        self.collect_cards().await
    }

    async fn inject_credential(&mut self, credential: &Credential) -> Result<(), SurfaceError> {
        if self.injected_token.as_deref() == Some(credential.access_token.as_str()) {
            return Ok(());
        }
        if !self.eval_bool(&storage_script(credential)).await? {
            return Err(SurfaceError::Script("credential injection rejected".into()));
        }
        self.injected_token = Some(credential.access_token.clone());
        debug!("Injected provider credential into page storage");

        // The UI reads storage on load.
        if let Some(url) = self.current_url.clone() {
            self.goto(&url).await?;
            self.load_results().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AutomationSurface for ChromiumSurface {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn navigate(&mut self, target: &SearchTarget) -> Result<(), SurfaceError> {
        let url = target_url(&self.base_url, target);
        debug!(url = %url, "Navigating");
        self.goto(&url).await
    }

    async fn search(&mut self, _target: &SearchTarget) -> Result<Vec<SearchCandidate>, SurfaceError> {
        let cards = self.load_results().await?;
        let total = cards.len();
        let candidates: Vec<_> = cards.into_iter().filter_map(parse_card).collect();
        debug!(cards = total, candidates = candidates.len(), "Collected results");
        Ok(candidates)
    }

    async fn trigger_fetch(
        &mut self,
        candidate: &SearchCandidate,
        credential: &Credential,
    ) -> Result<(), SurfaceError> {
        self.inject_credential(credential).await?;

        let clicked: Option<String> = self
            .page
            .evaluate(click_script(candidate).as_str())
            .await
            .map_err(|e| SurfaceError::Script(format!("click fetch action: {}", e)))?
            .into_value()
            .map_err(|e| SurfaceError::Script(e.to_string()))?;

        match clicked {
            Some(label) => {
                info!(title = %candidate.title, action = %label, "Triggered fetch");
                Ok(())
            }
            None => Err(SurfaceError::ElementMissing(format!(
                "fetch action for '{}'",
                candidate.title
            ))),
        }
    }

    async fn await_ready(
        &mut self,
        candidate: &SearchCandidate,
        timeout: Duration,
    ) -> Result<bool, SurfaceError> {
        let script = ready_script(candidate);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.eval_bool(&script).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn library_stats(&mut self) -> Result<LibraryStats, SurfaceError> {
        let on_library = self
            .current_url
            .as_deref()
            .is_some_and(|url| url.ends_with(LIBRARY_PATH));
        if !on_library {
            let url = format!("{}{}", self.base_url.trim_end_matches('/'), LIBRARY_PATH);
            debug!(url = %url, "Navigating to library");
            self.goto(&url).await?;
        }

        // The heading renders once the library has been counted.
        let deadline = tokio::time::Instant::now() + self.results_wait;
        loop {
            let heading: Option<String> = self
                .page
                .evaluate(LIBRARY_HEADING_SCRIPT)
                .await
                .map_err(|e| SurfaceError::Script(format!("library heading: {}", e)))?
                .into_value()
                .map_err(|e| SurfaceError::Script(e.to_string()))?;

            if let Some((torrents, total_size_tb)) = heading.as_deref().and_then(parse_library_heading)
            {
                return Ok(LibraryStats {
                    torrents,
                    total_size_tb,
                    refreshed_at: Utc::now(),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SurfaceError::ElementMissing(format!(
                    "library stats heading ({})",
                    heading.unwrap_or_else(|| "absent".to_string())
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn snapshot(&mut self) -> Result<Vec<u8>, SurfaceError> {
        let params = ScreenshotParams::builder().build();
        Ok(self.page.screenshot(params).await?)
    }

    async fn is_alive(&mut self) -> bool {
        self.page.evaluate("document.readyState").await.is_ok()
    }

    async fn shutdown(&mut self) -> Result<(), SurfaceError> {
        let closed = self.browser.close().await;
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        if let Err(e) = closed {
            warn!(error = %e, "Chromium did not close cleanly");
            return Err(SurfaceError::Disconnected(e.to_string()));
        }
        Ok(())
    }
}

impl Drop for ChromiumSurface {
    fn drop(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}
