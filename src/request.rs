//! Request-side types: what a caller asks the scraper to do.
//!
//! [`ScrapeRequest`] is the serde shape a routing layer deserialises from a
//! request body. [`FetchOptions`] is the validated form the pipeline works
//! with; converting between the two is where `wait_ms` gets clamped.

use crate::config::MAX_WAIT_MS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output format of `content_markdown`. Markdown is the only format today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
}

/// Which fetch backend a request should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Plain HTTP GET (static route).
    #[default]
    Http,
    /// Headless-browser rendering (rendered route).
    Browser,
    /// Static first; re-render in the browser when the page looks like an
    /// unrendered single-page app.
    Auto,
}

/// Request body accepted from the routing layer.
///
/// ```rust
/// use edgequake_web2md::ScrapeRequest;
///
/// let req: ScrapeRequest = serde_json::from_str(r#"{"url": "https://example.com"}"#).unwrap();
/// assert!(req.include_images);
/// assert_eq!(req.wait_ms, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,

    #[serde(default = "default_true")]
    pub include_images: bool,

    #[serde(default = "default_true")]
    pub include_links: bool,

    #[serde(default)]
    pub format: OutputFormat,

    /// CSS selector to wait for. Rendered route only.
    #[serde(default)]
    pub wait_for_selector: Option<String>,

    /// Extra wait after load, in milliseconds. Rendered route only.
    /// Values above [`MAX_WAIT_MS`] are clamped.
    #[serde(default)]
    pub wait_ms: u64,
}

fn default_true() -> bool {
    true
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            include_images: true,
            include_links: true,
            format: OutputFormat::Markdown,
            wait_for_selector: None,
            wait_ms: 0,
        }
    }
}

/// Validated per-request options handed to the pipeline.
///
/// The URL is kept as the caller's string: parsing it is the URL guard's job,
/// so malformed input surfaces as [`crate::Web2MdError::InvalidUrl`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub url: String,
    pub format: OutputFormat,
    pub include_images: bool,
    pub include_links: bool,
    pub wait_for_selector: Option<String>,
    wait: Duration,
}

impl FetchOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: OutputFormat::Markdown,
            include_images: true,
            include_links: true,
            wait_for_selector: None,
            wait: Duration::ZERO,
        }
    }

    pub fn include_images(mut self, v: bool) -> Self {
        self.include_images = v;
        self
    }

    pub fn include_links(mut self, v: bool) -> Self {
        self.include_links = v;
        self
    }

    pub fn wait_for_selector(mut self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        self.wait_for_selector = if selector.trim().is_empty() {
            None
        } else {
            Some(selector)
        };
        self
    }

    /// Set the extra post-load wait. Always clamped to [`MAX_WAIT_MS`].
    pub fn wait_ms(mut self, ms: u64) -> Self {
        self.wait = Duration::from_millis(ms.min(MAX_WAIT_MS));
        self
    }

    /// The clamped extra wait.
    pub fn wait(&self) -> Duration {
        self.wait
    }
}

impl From<ScrapeRequest> for FetchOptions {
    fn from(req: ScrapeRequest) -> Self {
        let mut opts = FetchOptions::new(req.url)
            .include_images(req.include_images)
            .include_links(req.include_links)
            .wait_ms(req.wait_ms);
        opts.format = req.format;
        if let Some(sel) = req.wait_for_selector {
            opts = opts.wait_for_selector(sel);
        }
        opts
    }
}
