//! Platform detection from the fetched HTML.
//!
//! Used by auto mode to decide whether a statically fetched page needs a
//! browser: an SPA shell has framework fingerprints and almost no text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Word count below which an SPA-fingerprinted page is treated as an
/// unrendered shell.
pub const SPA_MIN_WORDS: usize = 20;

/// What kind of site served the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    /// WordPress (`/wp-content/`, REST API link, generator tag).
    Wordpress,
    /// Client-rendered application shell with little server-sent content.
    Spa,
    /// Server-rendered or static HTML with readable content.
    #[default]
    Ssr,
}

impl PlatformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Wordpress => "wordpress",
            PlatformType::Spa => "spa",
            PlatformType::Ssr => "ssr",
        }
    }

    /// True when a rendered re-fetch would likely recover more content.
    pub fn needs_rendering(&self) -> bool {
        matches!(self, PlatformType::Spa)
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static RE_WORDPRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)/wp-content/|/wp-includes/|rel=["']https://api\.w\.org/|<meta[^>]+name=["']generator["'][^>]+content=["']WordPress"#,
    )
    .unwrap()
});

static RE_SPA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<div\s[^>]*\bid=["'](?:root|__next|app|__nuxt)["']|window\.__NUXT__|__NEXT_DATA__|ng-version=|data-reactroot|<svelte:"#,
    )
    .unwrap()
});

/// Classify a page from its raw HTML and the word count of its converted
/// Markdown. WordPress markers win over SPA markers.
pub fn detect_platform(html: &str, word_count: usize) -> PlatformType {
    if RE_WORDPRESS.is_match(html) {
        return PlatformType::Wordpress;
    }
    if word_count < SPA_MIN_WORDS && RE_SPA.is_match(html) {
        return PlatformType::Spa;
    }
    PlatformType::Ssr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wordpress_markers() {
        for html in [
            r#"<link rel="stylesheet" href="/wp-content/themes/x/style.css">"#,
            r#"<script src="/wp-includes/js/jquery.js"></script>"#,
            r#"<link rel="https://api.w.org/" href="https://blog.example/wp-json/">"#,
            r#"<meta name="generator" content="WordPress 6.4">"#,
        ] {
            assert_eq!(detect_platform(html, 500), PlatformType::Wordpress, "{html}");
        }
    }

    #[test]
    fn spa_shell_with_little_text() {
        for html in [
            r#"<div id="root"></div>"#,
            r#"<div class="x" id="__next"></div>"#,
            r#"<div id='app'></div>"#,
            "<script>window.__NUXT__={}</script>",
            r#"<script id="__NEXT_DATA__" type="application/json">{}</script>"#,
            r#"<app-root ng-version="17.0.0"></app-root>"#,
        ] {
            assert_eq!(detect_platform(html, 3), PlatformType::Spa, "{html}");
        }
    }

    #[test]
    fn spa_markers_with_enough_text_are_ssr() {
        assert_eq!(detect_platform(r#"<div id="__next"><p>...</p></div>"#, 400), PlatformType::Ssr);
    }

    #[test]
    fn plain_page_is_ssr() {
        assert_eq!(detect_platform("<html><body><p>hello</p></body></html>", 1), PlatformType::Ssr);
    }

    #[test]
    fn wordpress_beats_spa() {
        let html = r#"<div id="app"></div><link href="/wp-content/a.css">"#;
        assert_eq!(detect_platform(html, 0), PlatformType::Wordpress);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PlatformType::Wordpress).unwrap(), "\"wordpress\"");
        assert!(PlatformType::Spa.needs_rendering());
    }
}
