//! Request orchestration: one call in, one [`ScrapeResponse`] or one typed
//! error out.
//!
//! ## Stage order
//!
//! ```text
//! rate limit ─▶ guard ─▶ fetch ─▶ sanitize ─▶ extract ─▶ normalize ─▶ convert
//! ```
//!
//! Any stage error returns immediately; later stages never run. In
//! particular a rate-limit rejection happens before DNS, and a guard
//! rejection happens before any socket is opened.
//!
//! ## Crawls
//!
//! [`Scraper::crawl`] pays one unit of the crawl quota, then drives the
//! same per-page pipeline (minus the rate-limit check) for every URL the
//! [`Frontier`] hands out. Boilerplate removal runs once all pages are in.
//!
//! ## Why is the document stage synchronous?
//!
//! Only the fetch suspends. The parsed tree is `!Send`, so everything after
//! the fetch runs inside one plain function that owns the tree from parse
//! to drop. The request future stays `Send` and can be spawned.
//!
//! ## Cancellation
//!
//! The whole request runs under `request_timeout`. Dropping the future (the
//! deadline firing, or a caller disconnecting) drops the in-flight socket
//! read or browser step; a leased browser context is destroyed by its
//! handle's `Drop`. Nothing partial is ever returned.

use crate::browser::pool::BrowserPool;
use crate::browser::RenderEngine;
use crate::config::ScrapeConfig;
use crate::crawl::{CrawlOptions, CrawlResponse, Frontier};
use crate::error::Web2MdError;
use crate::output::{FetchResult, ScrapeResponse};
use crate::pipeline::detect::{detect_platform, PlatformType};
use crate::pipeline::fetch::FetchBackend;
use crate::pipeline::guard::{Resolver, SystemResolver, UrlGuard};
use crate::pipeline::http::HttpFetcher;
use crate::pipeline::markdown::{self, ConvertOptions};
use crate::pipeline::normalize::{normalize, normalize_canonical};
use crate::pipeline::render::RenderedFetcher;
use crate::pipeline::{boilerplate, extract, sanitize};
use crate::progress::{Observer, RequestOutcome, Stage, TracingObserver};
use crate::ratelimit::{limiter_from_config, RateLimitKey, RateLimiter, Route};
use crate::request::{FetchOptions, RenderMode, ScrapeRequest};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// Entry point for scraping. Cheap to share behind an `Arc`; every method
/// takes `&self` and concurrent calls share nothing but the rate limiter
/// and the browser pool.
pub struct Scraper {
    config: Arc<ScrapeConfig>,
    guard: UrlGuard,
    http: HttpFetcher,
    renderer: Option<RenderedFetcher>,
    limiter: Arc<dyn RateLimiter>,
    observer: Observer,
}

/// Builder for [`Scraper`]. Every collaborator has a production default.
pub struct ScraperBuilder {
    config: ScrapeConfig,
    resolver: Option<Arc<dyn Resolver>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    engine: Option<Arc<dyn RenderEngine>>,
}

impl ScraperBuilder {
    /// DNS resolver used by the URL guard. Default: the system resolver.
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Rate limiter. Default: built from the config's strategy and quotas.
    ///
    /// Supply a shared implementation here when several processes must
    /// count against the same quotas.
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Browser engine for the rendered route. Without one, rendered
    /// requests fail and auto mode never escalates.
    pub fn render_engine(mut self, engine: Arc<dyn RenderEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> Result<Scraper, Web2MdError> {
        let config = Arc::new(self.config);
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(SystemResolver));
        let guard = UrlGuard::new(resolver, &config.trusted_addrs, config.dns_timeout);
        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => limiter_from_config(&config)?,
        };
        let http = HttpFetcher::new(Arc::clone(&config), guard.clone());
        let renderer = self.engine.map(|engine| {
            let pool = BrowserPool::new(engine, config.pool_size, config.reuse_contexts);
            RenderedFetcher::new(Arc::clone(&config), guard.clone(), pool)
        });
        let observer: Observer = match &config.observer {
            Some(observer) => Arc::clone(observer),
            None => Arc::new(TracingObserver),
        };

        debug!(config = ?config, rendering = renderer.is_some(), "scraper ready");
        Ok(Scraper {
            config,
            guard,
            http,
            renderer,
            limiter,
            observer,
        })
    }
}

impl Scraper {
    /// Scraper with default collaborators and no render engine.
    pub fn new(config: ScrapeConfig) -> Result<Self, Web2MdError> {
        Self::builder(config).build()
    }

    pub fn builder(config: ScrapeConfig) -> ScraperBuilder {
        ScraperBuilder {
            config,
            resolver: None,
            limiter: None,
            engine: None,
        }
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// The browser pool, when a render engine was configured.
    pub fn pool(&self) -> Option<&BrowserPool> {
        self.renderer.as_ref().map(RenderedFetcher::pool)
    }

    /// Static-route scrape: plain HTTP GET.
    pub async fn scrape_static(&self, client: &str, opts: FetchOptions) -> Result<ScrapeResponse, Web2MdError> {
        self.scrape(client, Route::Static, opts).await
    }

    /// Rendered-route scrape: load the page in a pooled browser context.
    pub async fn scrape_rendered(&self, client: &str, opts: FetchOptions) -> Result<ScrapeResponse, Web2MdError> {
        self.scrape(client, Route::Rendered, opts).await
    }

    /// Static first; re-fetch through the browser when the result looks
    /// like an unrendered SPA shell.
    ///
    /// The re-fetch is a full rendered-route request and is charged to the
    /// rendered quota. If it fails for any reason the static result is
    /// returned.
    pub async fn scrape_auto(&self, client: &str, opts: FetchOptions) -> Result<ScrapeResponse, Web2MdError> {
        let first = self.scrape(client, Route::Static, opts.clone()).await?;
        if !first.platform_type.needs_rendering() || self.renderer.is_none() {
            return Ok(first);
        }

        info!(url = %first.url, words = first.word_count, "SPA shell detected, rendering");
        match self.scrape(client, Route::Rendered, opts).await {
            Ok(mut rendered) => {
                rendered.platform_type = PlatformType::Spa;
                Ok(rendered)
            }
            Err(e) => {
                warn!(url = %first.url, error = %e, "rendered fallback failed, keeping static result");
                Ok(first)
            }
        }
    }

    /// Dispatch a routing-layer request by mode.
    pub async fn scrape_request(
        &self,
        client: &str,
        mode: RenderMode,
        request: ScrapeRequest,
    ) -> Result<ScrapeResponse, Web2MdError> {
        let opts = FetchOptions::from(request);
        match mode {
            RenderMode::Http => self.scrape_static(client, opts).await,
            RenderMode::Browser => self.scrape_rendered(client, opts).await,
            RenderMode::Auto => self.scrape_auto(client, opts).await,
        }
    }

    /// Run one request on `route` for `client`.
    pub async fn scrape(&self, client: &str, route: Route, opts: FetchOptions) -> Result<ScrapeResponse, Web2MdError> {
        self.execute(Some(client), route, opts).await
    }

    /// Breadth-first crawl of the seed's site.
    ///
    /// Charged once to the crawl quota. Every page is fetched on the static
    /// backend under its own `request_timeout` and passes the URL guard
    /// again. A seed that fails fails the crawl; any later page that fails
    /// is skipped.
    pub async fn crawl(&self, client: &str, opts: CrawlOptions) -> Result<CrawlResponse, Web2MdError> {
        self.limiter.check(&RateLimitKey::new(client, Route::Crawl))?;
        let seed = self.guard.validate(&opts.url).await?.url;
        info!(
            url = %seed,
            max_pages = opts.pages_limit(),
            max_depth = opts.depth_limit(),
            "crawl started"
        );

        let mut frontier = Frontier::new(&seed, opts.depth_limit());
        let mut pages: Vec<ScrapeResponse> = Vec::new();
        let mut attempted = 0usize;
        while attempted < opts.pages_limit() {
            let Some((url, depth)) = frontier.pop() else { break };
            attempted += 1;

            let page_opts = FetchOptions::new(url.as_str())
                .include_images(opts.include_images)
                .include_links(true);
            let mut page = match self.execute(None, Route::Static, page_opts).await {
                Ok(page) => page,
                Err(e) if depth == 0 => return Err(e),
                Err(e) => {
                    warn!(url = %url, depth, error = %e, "crawl page skipped");
                    continue;
                }
            };

            if let Ok(landed) = Url::parse(&page.url) {
                frontier.mark_seen(&landed);
            }
            let added = frontier.push_links(page.links.iter().map(String::as_str), depth);
            debug!(url = %page.url, depth, added, queued = frontier.queued(), "crawl page done");
            if !opts.include_links {
                page.links.clear();
            }
            pages.push(page);
        }

        let boilerplate_removed = opts.remove_boilerplate && strip_boilerplate(&mut pages, opts.boilerplate_threshold);
        let total_word_count = pages.iter().map(|p| p.word_count).sum();
        info!(
            url = %seed,
            pages = pages.len(),
            attempted,
            words = total_word_count,
            boilerplate_removed,
            "crawl finished"
        );
        Ok(CrawlResponse {
            start_url: seed.to_string(),
            pages_crawled: pages.len(),
            pages,
            total_word_count,
            boilerplate_removed,
        })
    }

    /// One pipeline run. `client` is `None` for pages already paid for by
    /// a crawl admission.
    async fn execute(
        &self,
        client: Option<&str>,
        route: Route,
        opts: FetchOptions,
    ) -> Result<ScrapeResponse, Web2MdError> {
        let start = Instant::now();
        self.observer.on_request_start(route, &opts.url);

        let mut stage = Stage::RateLimit;
        let run = self.run(client, route, &opts, &mut stage);
        let result = match tokio::time::timeout(self.config.request_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(Web2MdError::DeadlineExceeded {
                url: opts.url.clone(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        };

        if let Err(Web2MdError::Internal(detail)) = &result {
            error!(url = %opts.url, route = %route, stage = %stage, detail = %detail, "internal error");
        }
        self.observer.on_request_complete(&RequestOutcome {
            route,
            url: opts.url.clone(),
            stage,
            elapsed: start.elapsed(),
            error: result.as_ref().err().map(Web2MdError::kind),
        });
        result
    }

    /// Release browser resources. In-flight rendered requests fail.
    pub async fn shutdown(&self) -> Result<(), Web2MdError> {
        match &self.renderer {
            Some(renderer) => renderer.pool().shutdown().await,
            None => Ok(()),
        }
    }

    fn backend(&self, route: Route) -> Result<FetchBackend<'_>, Web2MdError> {
        match route {
            Route::Static => Ok(FetchBackend::Static(&self.http)),
            Route::Rendered => self
                .renderer
                .as_ref()
                .map(FetchBackend::Rendered)
                .ok_or_else(|| Web2MdError::Internal("rendered route requested but no render engine is configured".into())),
            Route::Crawl => Err(Web2MdError::Internal("crawl pages are fetched on the static route".into())),
        }
    }

    async fn run(
        &self,
        client: Option<&str>,
        route: Route,
        opts: &FetchOptions,
        stage: &mut Stage,
    ) -> Result<ScrapeResponse, Web2MdError> {
        // ── Step 1: Rate limit ───────────────────────────────────────────
        let t = Instant::now();
        if let Some(client) = client {
            self.limiter.check(&RateLimitKey::new(client, route))?;
        }
        self.observer.on_stage_complete(Stage::RateLimit, t.elapsed());

        // ── Step 2: Guard ────────────────────────────────────────────────
        *stage = Stage::Guard;
        let backend = self.backend(route)?;
        let t = Instant::now();
        let target = self.guard.validate(&opts.url).await?;
        self.observer.on_stage_complete(Stage::Guard, t.elapsed());

        // ── Step 3: Fetch ────────────────────────────────────────────────
        *stage = Stage::Fetch;
        let t = Instant::now();
        let fetched = backend.fetch(&target, opts).await?;
        self.observer.on_stage_complete(Stage::Fetch, t.elapsed());
        debug!(
            url = %fetched.final_url,
            status = fetched.status,
            bytes = fetched.body.len(),
            content_type = fetched.content_type.as_deref().unwrap_or("-"),
            "fetched"
        );

        // ── Steps 4-7: Document ──────────────────────────────────────────
        self.process_document(&fetched, opts, stage)
    }

    /// Sanitize, extract, normalize and convert. Owns the parsed tree for
    /// its whole life.
    fn process_document(
        &self,
        fetched: &FetchResult,
        opts: &FetchOptions,
        stage: &mut Stage,
    ) -> Result<ScrapeResponse, Web2MdError> {
        let html = fetched.text();
        let base = &fetched.final_url;

        *stage = Stage::Sanitize;
        let t = Instant::now();
        let doc = sanitize::sanitize(&html);
        self.observer.on_stage_complete(Stage::Sanitize, t.elapsed());

        *stage = Stage::Extract;
        let t = Instant::now();
        let extracted = extract::extract(&doc, self.config.min_content_score);
        self.observer.on_stage_complete(Stage::Extract, t.elapsed());

        *stage = Stage::Normalize;
        let t = Instant::now();
        let media = normalize(&extracted, base);
        let canonical = normalize_canonical(extracted.canonical.as_deref(), base);
        self.observer.on_stage_complete(Stage::Normalize, t.elapsed());

        *stage = Stage::Convert;
        let t = Instant::now();
        let converted = markdown::convert(
            &extracted.main,
            &ConvertOptions {
                base,
                include_images: opts.include_images,
                include_links: opts.include_links,
            },
        );
        self.observer.on_stage_complete(Stage::Convert, t.elapsed());

        let platform_type = detect_platform(&html, converted.word_count);
        debug!(
            url = %base,
            words = converted.word_count,
            fallback = extracted.main_is_fallback,
            platform = %platform_type,
            "document processed"
        );

        Ok(ScrapeResponse {
            url: base.to_string(),
            title: extracted.title.clone(),
            description: extracted.description.clone(),
            content_markdown: converted.markdown,
            images: if opts.include_images { media.images } else { Vec::new() },
            videos: media.videos,
            links: if opts.include_links { media.links } else { Vec::new() },
            word_count: converted.word_count,
            platform_type,
            canonical,
        })
    }
}

/// Remove cross-page boilerplate in place and recount words. True when
/// anything was removed.
fn strip_boilerplate(pages: &mut [ScrapeResponse], threshold: f64) -> bool {
    let contents: Vec<&str> = pages.iter().map(|p| p.content_markdown.as_str()).collect();
    let (cleaned, removed) = boilerplate::remove_boilerplate(&contents, threshold);
    if removed {
        for (page, markdown) in pages.iter_mut().zip(cleaned) {
            page.word_count = markdown::word_count(&markdown);
            page.content_markdown = markdown;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::guard::StaticResolver;
    use crate::ratelimit::FixedWindowLimiter;
    use std::net::IpAddr;
    use std::time::Duration;

    fn scraper() -> Scraper {
        let resolver = StaticResolver::new()
            .with_host("internal.example", vec!["10.0.0.7".parse::<IpAddr>().unwrap()]);
        Scraper::builder(ScrapeConfig::default())
            .resolver(Arc::new(resolver))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn guard_rejection_short_circuits() {
        let err = scraper()
            .scrape_static("c", FetchOptions::new("http://internal.example/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Web2MdError::SsrfBlocked { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn invalid_url_is_reported() {
        let err = scraper().scrape_static("c", FetchOptions::new("not a url")).await.unwrap_err();
        assert!(matches!(err, Web2MdError::InvalidUrl { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn rendered_route_without_engine_is_internal() {
        let err = scraper()
            .scrape_rendered("c", FetchOptions::new("https://example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Web2MdError::Internal(_)));
        assert_eq!(err.public_message(), "internal error");
    }

    #[tokio::test]
    async fn rate_limit_runs_before_guard() {
        let limiter = Arc::new(FixedWindowLimiter::new(1, 1, Duration::from_secs(60)));
        let s = Scraper::builder(ScrapeConfig::default())
            .resolver(Arc::new(StaticResolver::new()))
            .rate_limiter(limiter)
            .build()
            .unwrap();
        // First request spends the quota even though the guard rejects it.
        let first = s.scrape_static("c", FetchOptions::new("http://127.0.0.1/")).await.unwrap_err();
        assert!(matches!(first, Web2MdError::SsrfBlocked { .. }));
        let second = s.scrape_static("c", FetchOptions::new("http://127.0.0.1/")).await.unwrap_err();
        assert!(matches!(second, Web2MdError::RateLimited { .. }), "got {second:?}");
    }

    #[tokio::test]
    async fn auto_mode_without_engine_returns_static_errors() {
        let err = scraper()
            .scrape_request("c", RenderMode::Auto, ScrapeRequest::new("http://internal.example/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Web2MdError::SsrfBlocked { .. }));
    }

    #[test]
    fn scraper_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let s = scraper();
        let fut = s.scrape_static("c", FetchOptions::new("https://example.com/"));
        assert_send(&fut);
        let crawl = s.crawl("c", CrawlOptions::new("https://example.com/"));
        assert_send(&crawl);
    }

    #[tokio::test]
    async fn crawl_of_private_seed_is_refused() {
        let err = scraper()
            .crawl("c", CrawlOptions::new("http://internal.example/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Web2MdError::SsrfBlocked { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn crawl_quota_is_separate_from_scrape_quota() {
        let config = ScrapeConfig::builder().crawl_quota(1).build().unwrap();
        let s = Scraper::builder(config)
            .resolver(Arc::new(StaticResolver::new()))
            .build()
            .unwrap();
        let first = s.crawl("c", CrawlOptions::new("http://127.0.0.1/")).await.unwrap_err();
        assert!(matches!(first, Web2MdError::SsrfBlocked { .. }));
        let second = s.crawl("c", CrawlOptions::new("http://127.0.0.1/")).await.unwrap_err();
        assert!(
            matches!(second, Web2MdError::RateLimited { route: Route::Crawl, .. }),
            "got {second:?}"
        );
        // The static quota is untouched.
        let page = s.scrape_static("c", FetchOptions::new("http://127.0.0.1/")).await.unwrap_err();
        assert!(matches!(page, Web2MdError::SsrfBlocked { .. }));
    }

    fn page(markdown: &str) -> ScrapeResponse {
        ScrapeResponse {
            url: "https://site.example/".into(),
            title: String::new(),
            description: String::new(),
            content_markdown: markdown.into(),
            images: vec![],
            videos: vec![],
            links: vec![],
            word_count: markdown::word_count(markdown),
            platform_type: PlatformType::Ssr,
            canonical: None,
        }
    }

    #[test]
    fn stripping_boilerplate_recounts_words() {
        let footer = "Subscribe to our newsletter for weekly updates and offers.";
        let mut pages = vec![
            page(&format!("Alpha beta gamma delta.

{footer}")),
            page(&format!("Epsilon zeta eta.

{footer}")),
        ];
        assert!(strip_boilerplate(&mut pages, 0.6));
        assert_eq!(pages[0].content_markdown, "Alpha beta gamma delta.");
        assert_eq!(pages[0].word_count, 4);
        assert_eq!(pages[1].word_count, 3);
    }
}
