//! # edgequake-web2md
//!
//! Turn an arbitrary web page into clean, structured Markdown.
//!
//! ## Why this crate?
//!
//! Fetching a URL on behalf of someone else is an attack surface: the URL
//! may point at a cloud metadata endpoint, redirect into the private
//! network, stream gigabytes, or hold a headless browser forever. This crate
//! wraps the fetch in an SSRF guard that re-checks every redirect hop, caps
//! every unbounded input (body size, navigation time, selector wait, extra
//! wait), and leases browser contexts from a fixed-size pool. What comes
//! back is the page's main content as Markdown plus its absolute media and
//! link URLs.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Limit      per-client, per-route quota (static > rendered)
//!  ├─ 2. Guard      scheme, credentials, DNS → public addresses only
//!  ├─ 3. Fetch      reqwest (guarded redirects, streamed size cap)
//!  │                or headless Chrome from the browser pool
//!  ├─ 4. Sanitize   drop scripts, hidden nodes, boilerplate, handlers
//!  ├─ 5. Extract    title, description, highest-scoring content subtree
//!  ├─ 6. Normalize  absolute, deduplicated image/video/link URLs
//!  └─ 7. Convert    Markdown + cleanup rules + word count
//! ```
//!
//! [`Scraper::crawl`] repeats steps 2-7 over a same-site breadth-first
//! frontier and then strips blocks repeated across most of the pages.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_web2md::{FetchOptions, ScrapeConfig, Scraper};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scraper = Scraper::new(ScrapeConfig::default())?;
//!     let page = scraper
//!         .scrape_static("client-1", FetchOptions::new("https://example.com/"))
//!         .await?;
//!     println!("# {}\n\n{}", page.title, page.content_markdown);
//!     eprintln!("{} words, {} images", page.word_count, page.images.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature    | Default | Description |
//! |------------|---------|-------------|
//! | `cli`      | on      | Enables the `web2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `chromium` | on      | Headless Chrome render engine via chromiumoxide |
//!
//! Without `chromium` the rendered route still works with any
//! [`RenderEngine`] you supply:
//! ```toml
//! edgequake-web2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod browser;
pub mod config;
pub mod crawl;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod ratelimit;
pub mod request;
pub mod scrape;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use browser::pool::{BrowserHandle, BrowserPool, PoolStats};
pub use browser::{Navigation, RenderContext, RenderEngine, RequestGate};
pub use config::{RateLimitStrategy, ScrapeConfig, ScrapeConfigBuilder, MAX_WAIT_MS};
pub use crawl::{CrawlOptions, CrawlRequest, CrawlResponse, MAX_PAGES_HARD_LIMIT};
pub use error::{ErrorKind, Web2MdError};
pub use output::{generate_slug, FetchResult, ScrapeResponse};
pub use pipeline::detect::PlatformType;
pub use pipeline::guard::{Resolver, StaticResolver, SystemResolver, UrlGuard, ValidatedUrl};
pub use progress::{NoopObserver, RequestOutcome, ScrapeObserver, Stage, TracingObserver};
pub use ratelimit::{FixedWindowLimiter, RateLimitKey, RateLimiter, Route, TokenBucketLimiter};
pub use request::{FetchOptions, OutputFormat, RenderMode, ScrapeRequest};
pub use scrape::{Scraper, ScraperBuilder};

#[cfg(feature = "chromium")]
pub use browser::chromium::{ChromiumEngine, ChromiumOptions};
