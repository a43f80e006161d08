//! Same-site crawl: breadth-first from a seed URL, bounded by page count and
//! link depth.
//!
//! A crawl is one admission on the [`Route::Crawl`](crate::Route::Crawl)
//! quota. Each page then runs the full static pipeline, URL guard included,
//! so a link or redirect into a reserved range is refused exactly as it
//! would be for a single scrape. Pages that fail are logged and skipped;
//! only a failing seed fails the crawl.
//!
//! ## Frontier rules
//!
//! * Only links on the seed's host (and explicit port) are followed.
//! * Fragments are ignored when deciding whether a URL was already seen.
//! * CMS admin, login, API, feed and asset paths are never queued, nor are
//!   `?feed`, `?preview` and `?replytocom` variants.
//! * Links are taken from the extracted main content, not the whole page.

use crate::output::ScrapeResponse;
use crate::pipeline::boilerplate::DEFAULT_THRESHOLD;
use crate::request::OutputFormat;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use url::Url;

/// Ceiling on pages per crawl, whatever the caller asks for.
pub const MAX_PAGES_HARD_LIMIT: usize = 50;

/// Ceiling on link depth from the seed.
pub const MAX_DEPTH_LIMIT: usize = 5;

const SKIP_PATH_PREFIXES: &[&str] = &["/wp-admin", "/wp-login", "/wp-json", "/wp-content"];
const SKIP_PATH_SUFFIXES: &[&str] = &[".xml", ".rss", ".atom", "xmlrpc.php", "/feed"];
const SKIP_QUERY_PARAMS: &[&str] = &["feed", "preview", "replytocom"];

/// Crawl request body accepted from the routing layer.
///
/// ```rust
/// use edgequake_web2md::CrawlRequest;
///
/// let req: CrawlRequest = serde_json::from_str(r#"{"url": "https://example.com"}"#).unwrap();
/// assert_eq!((req.max_pages, req.max_depth), (10, 3));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,

    #[serde(default = "default_true")]
    pub include_images: bool,

    #[serde(default = "default_true")]
    pub include_links: bool,

    #[serde(default)]
    pub format: OutputFormat,

    /// Clamped to `1..=`[`MAX_PAGES_HARD_LIMIT`].
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Clamped to `0..=`[`MAX_DEPTH_LIMIT`]. Zero fetches the seed only.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Strip blocks repeated across most pages. Default: true.
    #[serde(default = "default_true")]
    pub remove_boilerplate: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_pages() -> usize {
    10
}

fn default_max_depth() -> usize {
    3
}

/// Validated crawl options.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOptions {
    pub url: String,
    pub include_images: bool,
    pub include_links: bool,
    pub remove_boilerplate: bool,
    /// Fraction of pages a block must appear on to count as boilerplate.
    pub boilerplate_threshold: f64,
    max_pages: usize,
    max_depth: usize,
}

impl CrawlOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            include_images: true,
            include_links: true,
            remove_boilerplate: true,
            boilerplate_threshold: DEFAULT_THRESHOLD,
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
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

    pub fn remove_boilerplate(mut self, v: bool) -> Self {
        self.remove_boilerplate = v;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.max_pages = n.clamp(1, MAX_PAGES_HARD_LIMIT);
        self
    }

    pub fn max_depth(mut self, n: usize) -> Self {
        self.max_depth = n.min(MAX_DEPTH_LIMIT);
        self
    }

    pub fn pages_limit(&self) -> usize {
        self.max_pages
    }

    pub fn depth_limit(&self) -> usize {
        self.max_depth
    }
}

impl From<CrawlRequest> for CrawlOptions {
    fn from(req: CrawlRequest) -> Self {
        CrawlOptions::new(req.url)
            .include_images(req.include_images)
            .include_links(req.include_links)
            .remove_boilerplate(req.remove_boilerplate)
            .max_pages(req.max_pages)
            .max_depth(req.max_depth)
    }
}

/// Result of a crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlResponse {
    pub start_url: String,
    pub pages_crawled: usize,
    /// Successfully converted pages in visit order.
    pub pages: Vec<ScrapeResponse>,
    pub total_word_count: usize,
    /// True when repeated blocks were stripped from the pages.
    pub boilerplate_removed: bool,
}

/// Breadth-first queue of same-site URLs still to visit.
#[derive(Debug)]
pub struct Frontier {
    host: String,
    port: Option<u16>,
    max_depth: usize,
    queue: VecDeque<(Url, usize)>,
    seen: HashSet<String>,
}

impl Frontier {
    /// Frontier holding only `seed`, at depth zero.
    pub fn new(seed: &Url, max_depth: usize) -> Self {
        let mut frontier = Self {
            host: seed.host_str().unwrap_or_default().to_ascii_lowercase(),
            port: seed.port(),
            max_depth,
            queue: VecDeque::new(),
            seen: HashSet::new(),
        };
        let seed = without_fragment(seed);
        frontier.seen.insert(seed.to_string());
        frontier.queue.push_back((seed, 0));
        frontier
    }

    /// Next URL to fetch with its depth.
    pub fn pop(&mut self) -> Option<(Url, usize)> {
        self.queue.pop_front()
    }

    /// Record a URL reached another way (a redirect target) so it is not
    /// fetched again.
    pub fn mark_seen(&mut self, url: &Url) {
        self.seen.insert(without_fragment(url).to_string());
    }

    /// Queue the links of a page found at `depth`. Returns how many were
    /// new.
    pub fn push_links<'a>(&mut self, links: impl IntoIterator<Item = &'a str>, depth: usize) -> usize {
        if depth >= self.max_depth {
            return 0;
        }
        let mut added = 0;
        for link in links {
            let Ok(url) = Url::parse(link) else { continue };
            let url = without_fragment(&url);
            if !self.is_same_site(&url) || should_skip(&url) {
                continue;
            }
            if self.seen.insert(url.to_string()) {
                self.queue.push_back((url, depth + 1));
                added += 1;
            }
        }
        added
    }

    pub fn is_same_site(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|h| h.eq_ignore_ascii_case(&self.host))
            && url.port() == self.port
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

fn without_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

/// True for URLs unlikely to hold page content.
pub fn should_skip(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    if SKIP_PATH_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return true;
    }
    let trimmed = path.trim_end_matches('/');
    if SKIP_PATH_SUFFIXES.iter().any(|s| trimmed.ends_with(s)) {
        return true;
    }
    url.query_pairs()
        .any(|(k, _)| SKIP_QUERY_PARAMS.contains(&&*k))
}
