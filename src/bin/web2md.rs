//! CLI binary for edgequake-web2md.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ScrapeConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_web2md::{
    CrawlOptions, CrawlResponse, FetchOptions, RenderMode, RequestOutcome, Route, ScrapeConfig,
    ScrapeObserver, ScrapeResponse, Scraper, Stage, Web2MdError,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Rate-limit key for the local user. The CLI is a single client.
const CLI_CLIENT: &str = "cli";

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI spinner driven by pipeline events ────────────────────────────────────

/// Terminal observer: a spinner showing the current stage, plus one log line
/// per finished request (auto mode can issue two).
struct CliSpinner {
    bar: ProgressBar,
}

impl CliSpinner {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ScrapeObserver for CliSpinner {
    fn on_request_start(&self, route: Route, url: &str) {
        self.bar.set_prefix(match route {
            Route::Static => "Fetching",
            Route::Rendered => "Rendering",
            Route::Crawl => "Crawling",
        });
        self.bar.set_message(url.to_string());
    }

    fn on_stage_complete(&self, stage: Stage, _elapsed: Duration) {
        let next = match stage {
            Stage::RateLimit => "Checking URL",
            Stage::Guard => "Downloading",
            Stage::Fetch => "Cleaning",
            Stage::Sanitize => "Extracting",
            Stage::Extract => "Resolving",
            Stage::Normalize => "Converting",
            Stage::Convert => "Done",
        };
        self.bar.set_prefix(next);
    }

    fn on_request_complete(&self, outcome: &RequestOutcome) {
        let secs = dim(&format!("{:.1}s", outcome.elapsed.as_secs_f64()));
        match outcome.error {
            None => self.bar.println(format!(
                "  {} {:<8}  {}  {}",
                green("✓"),
                outcome.route.as_str(),
                outcome.url,
                secs
            )),
            Some(kind) => self.bar.println(format!(
                "  {} {:<8}  {}  {} at {}  {}",
                red("✗"),
                outcome.route.as_str(),
                outcome.url,
                red(kind.as_str()),
                outcome.stage,
                secs
            )),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Static page to stdout
  web2md https://example.com/blog/post

  # Save to a file with YAML front-matter
  web2md https://example.com/blog/post --frontmatter -o post.md

  # Single-page app: render in headless Chrome, wait for the content root
  web2md --mode browser --wait-for '#app' https://app.example.com/

  # Let web2md decide: static first, browser if the page is an SPA shell
  web2md --mode auto https://example.com/

  # Full structured result (title, media, links, word count)
  web2md --json https://example.com/ > page.json

  # Text only
  web2md --no-images --no-links https://example.com/

  # Crawl up to 20 pages of the same site, two links deep
  web2md --crawl --max-pages 20 --max-depth 2 https://example.com/docs/

MODES:
  http      Plain HTTP GET. Fast, no JavaScript.
  browser   Headless Chrome. Needs Chrome/Chromium installed.
  auto      HTTP first; re-render when the page looks like an empty SPA shell.

SAFETY:
  URLs that resolve to private, loopback, link-local or otherwise reserved
  addresses are refused, and so is every redirect into them. Use
  --allow-private to reach 127.0.0.1 / ::1 when testing a local server.

ENVIRONMENT VARIABLES:
  WEB2MD_MODE, WEB2MD_OUTPUT, WEB2MD_WAIT_FOR, WEB2MD_WAIT_MS, ...
                          Every flag has a WEB2MD_* equivalent
  WEB2MD_CHROME_PATH      Chrome/Chromium executable
  RUST_LOG                Overrides the log filter (e.g. edgequake_web2md=debug)
"#;

/// Convert web pages to clean Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "web2md",
    version,
    about = "Convert web pages to clean Markdown",
    long_about = "Fetch a web page (plain HTTP or headless Chrome), strip scripts, navigation \
and boilerplate, pick the main content and convert it to Markdown. Private and reserved \
addresses are refused, including through redirects.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HTTP/HTTPS URL to convert.
    url: String,

    /// Fetch mode: http, browser or auto.
    #[arg(long, env = "WEB2MD_MODE", value_enum, default_value = "http")]
    mode: ModeArg,

    /// CSS selector to wait for before capturing (browser mode).
    #[arg(long, env = "WEB2MD_WAIT_FOR")]
    wait_for: Option<String>,

    /// Extra wait in milliseconds after load (browser mode, max 10000).
    #[arg(long, env = "WEB2MD_WAIT_MS", default_value_t = 0)]
    wait_ms: u64,

    /// Leave images out of the Markdown and the image list.
    #[arg(long, env = "WEB2MD_NO_IMAGES")]
    no_images: bool,

    /// Render links as plain text and leave them out of the link list.
    #[arg(long, env = "WEB2MD_NO_LINKS")]
    no_links: bool,

    /// Crawl same-site links breadth-first instead of fetching one page
    /// (plain HTTP only).
    #[arg(long, env = "WEB2MD_CRAWL", conflicts_with_all = ["wait_for"])]
    crawl: bool,

    /// Maximum pages to fetch when crawling (max 50).
    #[arg(long, env = "WEB2MD_MAX_PAGES", default_value_t = 10)]
    max_pages: usize,

    /// Maximum link depth from the start URL when crawling (max 5).
    #[arg(long, env = "WEB2MD_MAX_DEPTH", default_value_t = 3)]
    max_depth: usize,

    /// Keep blocks repeated across crawled pages (navigation, footers).
    #[arg(long, env = "WEB2MD_KEEP_BOILERPLATE")]
    keep_boilerplate: bool,

    /// Output the full structured result as JSON instead of Markdown.
    #[arg(long, env = "WEB2MD_JSON")]
    json: bool,

    /// Prepend YAML front-matter (url, title, description, word count).
    #[arg(long, env = "WEB2MD_FRONTMATTER")]
    frontmatter: bool,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "WEB2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Maximum response body size in bytes.
    #[arg(long, env = "WEB2MD_MAX_BYTES", default_value_t = 10 * 1024 * 1024)]
    max_bytes: usize,

    /// TCP + TLS connect timeout in seconds.
    #[arg(long, env = "WEB2MD_CONNECT_TIMEOUT", default_value_t = 5)]
    connect_timeout: u64,

    /// Read timeout in seconds (max silence between body chunks).
    #[arg(long, env = "WEB2MD_READ_TIMEOUT", default_value_t = 10)]
    read_timeout: u64,

    /// Browser navigation timeout in seconds.
    #[arg(long, env = "WEB2MD_NAVIGATION_TIMEOUT", default_value_t = 15)]
    navigation_timeout: u64,

    /// Overall deadline for the whole request in seconds.
    #[arg(long, env = "WEB2MD_REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,

    /// Number of browser contexts kept by the pool.
    #[arg(long, env = "WEB2MD_POOL_SIZE", default_value_t = 1)]
    pool_size: usize,

    /// Chrome/Chromium executable. Default: auto-detected.
    #[arg(long, env = "WEB2MD_CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Trust loopback addresses (127.0.0.1, ::1). For local testing only.
    #[arg(long, env = "WEB2MD_ALLOW_PRIVATE")]
    allow_private: bool,

    /// Log format for stderr: text or json.
    #[arg(long, env = "WEB2MD_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormatArg,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "WEB2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "WEB2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Http,
    Browser,
    Auto,
}

impl From<ModeArg> for RenderMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Http => RenderMode::Http,
            ModeArg::Browser => RenderMode::Browser,
            ModeArg::Auto => RenderMode::Auto,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormatArg {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<Web2MdError>() {
                Some(err) => eprintln!(
                    "{} {}  {}",
                    red("✘"),
                    bold(err.kind().as_str()),
                    red(&err.public_message())
                ),
                None => eprintln!("{} {}", red("✘"), red(&format!("{e:#}"))),
            }
            ExitCode::FAILURE
        }
    }
}

// ── Logging setup ────────────────────────────────────────────────────────────
// Library INFO logs are suppressed while the spinner is active; the spinner
// and the per-request lines carry the same information.
fn init_logging(cli: &Cli) {
    let show_progress = show_progress(cli);
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match cli.log_format {
        LogFormatArg::Json => builder.json().init(),
        LogFormatArg::Text => builder.init(),
    }
}

fn show_progress(cli: &Cli) -> bool {
    !cli.quiet && !cli.verbose && cli.log_format == LogFormatArg::Text
}

async fn run(cli: &Cli) -> Result<()> {
    // ── Build scraper ────────────────────────────────────────────────────
    let spinner = show_progress(cli).then(CliSpinner::new);
    let config = build_config(cli, spinner.clone())?;
    let scraper = build_scraper(cli, config).await?;

    if cli.crawl {
        let opts = CrawlOptions::new(&cli.url)
            .include_images(!cli.no_images)
            .include_links(!cli.no_links)
            .remove_boilerplate(!cli.keep_boilerplate)
            .max_pages(cli.max_pages)
            .max_depth(cli.max_depth);
        let result = scraper.crawl(CLI_CLIENT, opts).await;
        if let Some(ref spinner) = spinner {
            spinner.finish();
        }
        let crawl = result?;
        let rendered = render_crawl(cli, &crawl)?;
        write_output(cli, &rendered).await?;
        if !cli.quiet && !cli.json {
            eprintln!(
                "{}",
                dim(&format!(
                    "{} pages  {} words{}",
                    crawl.pages_crawled,
                    crawl.total_word_count,
                    if crawl.boilerplate_removed { "  boilerplate removed" } else { "" }
                ))
            );
        }
        return Ok(());
    }

    let opts = {
        let mut opts = FetchOptions::new(&cli.url)
            .include_images(!cli.no_images)
            .include_links(!cli.no_links)
            .wait_ms(cli.wait_ms);
        if let Some(ref selector) = cli.wait_for {
            opts = opts.wait_for_selector(selector.clone());
        }
        opts
    };

    // ── Scrape ───────────────────────────────────────────────────────────
    let result = match RenderMode::from(cli.mode) {
        RenderMode::Http => scraper.scrape_static(CLI_CLIENT, opts).await,
        RenderMode::Browser => scraper.scrape_rendered(CLI_CLIENT, opts).await,
        RenderMode::Auto => scraper.scrape_auto(CLI_CLIENT, opts).await,
    };
    if let Some(ref spinner) = spinner {
        spinner.finish();
    }
    if let Err(e) = scraper.shutdown().await {
        tracing::warn!(error = %e, "browser shutdown failed");
    }
    let page = result?;

    // ── Write output ─────────────────────────────────────────────────────
    let rendered = render_output(cli, &page)?;
    match cli.output {
        Some(ref path) => {
            tokio::fs::write(path, rendered.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} words  {} images  {} links  [{}]  →  {}",
                    green("✔"),
                    page.word_count,
                    page.images.len(),
                    page.links.len(),
                    cyan(page.platform_type.as_str()),
                    bold(&path.display().to_string()),
                );
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
            if !rendered.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            if !cli.quiet && !cli.json {
                eprintln!(
                    "{}",
                    dim(&format!(
                        "{} words  {} images  {} links  [{}]",
                        page.word_count,
                        page.images.len(),
                        page.links.len(),
                        page.platform_type
                    ))
                );
            }
        }
    }

    Ok(())
}

/// Pages joined by horizontal rules, each with front matter when asked.
fn render_crawl(cli: &Cli, crawl: &CrawlResponse) -> Result<String> {
    if cli.json {
        return serde_json::to_string_pretty(crawl).context("Failed to serialise output");
    }
    let docs: Vec<String> = crawl
        .pages
        .iter()
        .map(|page| {
            if cli.frontmatter {
                page.to_markdown_document()
            } else {
                format!("<!-- {} -->\n\n{}", page.url, page.content_markdown)
            }
        })
        .collect();
    Ok(docs.join("\n\n---\n\n"))
}

async fn write_output(cli: &Cli, rendered: &str) -> Result<()> {
    match cli.output {
        Some(ref path) => tokio::fs::write(path, rendered.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
            if !rendered.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}

fn render_output(cli: &Cli, page: &ScrapeResponse) -> Result<String> {
    if cli.json {
        return serde_json::to_string_pretty(page).context("Failed to serialise output");
    }
    if cli.frontmatter {
        return Ok(page.to_markdown_document());
    }
    Ok(page.content_markdown.clone())
}

/// Map CLI args to `ScrapeConfig`.
fn build_config(cli: &Cli, observer: Option<Arc<CliSpinner>>) -> Result<ScrapeConfig> {
    let mut builder = ScrapeConfig::builder()
        .max_body_bytes(cli.max_bytes)
        .connect_timeout(Duration::from_secs(cli.connect_timeout))
        .read_timeout(Duration::from_secs(cli.read_timeout))
        .navigation_timeout(Duration::from_secs(cli.navigation_timeout))
        .request_timeout(Duration::from_secs(cli.request_timeout))
        .pool_size(cli.pool_size);

    if cli.allow_private {
        builder = builder
            .trust_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .trust_addr(IpAddr::V6(Ipv6Addr::LOCALHOST));
    }
    if let Some(observer) = observer {
        builder = builder.observer(observer);
    }

    builder.build().context("Invalid configuration")
}

/// Launch a browser only when the chosen mode can use one.
async fn build_scraper(cli: &Cli, config: ScrapeConfig) -> Result<Scraper> {
    let builder = Scraper::builder(config);
    if cli.crawl || matches!(cli.mode, ModeArg::Http) {
        return Ok(builder.build()?);
    }

    #[cfg(feature = "chromium")]
    {
        use edgequake_web2md::{ChromiumEngine, ChromiumOptions};

        let options = ChromiumOptions {
            executable: cli.chrome_path.clone(),
            ..ChromiumOptions::default()
        };
        let engine = ChromiumEngine::launch(options)
            .await
            .context("Failed to launch headless Chrome (set --chrome-path?)")?;
        Ok(builder.render_engine(Arc::new(engine)).build()?)
    }

    #[cfg(not(feature = "chromium"))]
    {
        if matches!(cli.mode, ModeArg::Browser) {
            anyhow::bail!("browser mode needs the `chromium` feature");
        }
        tracing::warn!("built without `chromium`; auto mode will not render");
        Ok(builder.build()?)
    }
}
