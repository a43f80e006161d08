//! Output types: what a fetch produces and what a scrape returns.

use crate::pipeline::detect::PlatformType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Raw result of one fetch, produced by exactly one backend call.
///
/// `body.len()` never exceeds the configured size cap: the backends abort
/// before the buffer can grow past it.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// URL after redirects (static) or after navigation (rendered). Base for
    /// every relative reference found in the page.
    pub final_url: Url,
    /// HTTP status of the final response. The rendered backend reports the
    /// main document status, or 200 when the browser does not expose one.
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl FetchResult {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The structured result of a scrape. This is the only type handed back to
/// the routing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResponse {
    /// Final URL after redirects or navigation.
    pub url: String,
    pub title: String,
    /// Meta description, or empty.
    pub description: String,
    pub content_markdown: String,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub links: Vec<String>,
    /// Whitespace-token count of the plain-text rendering of `content_markdown`.
    pub word_count: usize,
    pub platform_type: PlatformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
}

impl ScrapeResponse {
    /// URL slug derived from the final URL path, falling back to the title.
    pub fn slug(&self) -> String {
        generate_slug(&self.url, &self.title)
    }

    /// Markdown document with a YAML front-matter header.
    pub fn to_markdown_document(&self) -> String {
        let mut doc = format_yaml_front_matter(self);
        doc.push_str(&self.content_markdown);
        doc
    }
}

/// Generate a lowercase, hyphen-separated ASCII slug.
///
/// Uses the last path segment (extension removed), else the title, else the
/// host. Returns `"page"` when nothing usable remains.
pub fn generate_slug(url: &str, title: &str) -> String {
    let parsed = Url::parse(url).ok();
    let last_segment = parsed
        .as_ref()
        .and_then(|u| u.path_segments())
        .and_then(|segs| segs.filter(|s| !s.is_empty()).last())
        .map(|seg| match seg.rfind('.') {
            Some(idx) if idx > 0 => seg[..idx].to_string(),
            _ => seg.to_string(),
        });

    let base = match last_segment {
        Some(seg) if !seg.is_empty() => seg,
        _ if !title.trim().is_empty() => title.to_string(),
        _ => parsed
            .as_ref()
            .and_then(|u| u.host_str())
            .unwrap_or_default()
            .to_string(),
    };

    let mut slug = String::with_capacity(base.len());
    let mut pending_dash = false;
    for c in base.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c.is_ascii() {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "page".to_string()
    } else {
        slug
    }
}

/// Format response metadata as YAML front matter.
fn format_yaml_front_matter(resp: &ScrapeResponse) -> String {
    let mut yaml = String::from("---\n");
    yaml.push_str(&format!("title: \"{}\"\n", escape_yaml(&resp.title)));
    yaml.push_str(&format!(
        "description: \"{}\"\n",
        escape_yaml(&resp.description)
    ));
    yaml.push_str(&format!("url: \"{}\"\n", escape_yaml(&resp.url)));
    yaml.push_str(&format!("slug: \"{}\"\n", resp.slug()));
    if let Some(ref c) = resp.canonical {
        if c != &resp.url {
            yaml.push_str(&format!("canonical: \"{}\"\n", escape_yaml(c)));
        }
    }
    yaml.push_str("---\n\n");
    yaml
}

fn escape_yaml(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> ScrapeResponse {
        ScrapeResponse {
            url: "https://example.com/blog/hello-world.html".into(),
            title: "Hello \"World\"".into(),
            description: "A greeting".into(),
            content_markdown: "# Hello\n\nBody text.\n".into(),
            images: vec![],
            videos: vec![],
            links: vec![],
            word_count: 3,
            platform_type: PlatformType::Ssr,
            canonical: Some("https://example.com/hello".into()),
        }
    }

    #[test]
    fn slug_from_last_segment() {
        assert_eq!(
            generate_slug("https://example.com/blog/Hello_World.html", ""),
            "hello-world"
        );
        assert_eq!(generate_slug("https://example.com/a/b/", ""), "b");
    }

    #[test]
    fn slug_falls_back_to_title_then_host() {
        assert_eq!(
            generate_slug("https://example.com/", "  Rust: A Primer! "),
            "rust-a-primer"
        );
        assert_eq!(generate_slug("https://docs.example.com/", ""), "docs-example-com");
        assert_eq!(generate_slug("not a url", "???"), "page");
    }

    #[test]
    fn front_matter_escapes_and_includes_canonical() {
        let doc = response().to_markdown_document();
        assert!(doc.starts_with("---\n"), "got: {doc}");
        assert!(doc.contains("title: \"Hello \\\"World\\\"\""), "got: {doc}");
        assert!(doc.contains("slug: \"hello-world\""), "got: {doc}");
        assert!(doc.contains("canonical: \"https://example.com/hello\""));
        assert!(doc.ends_with("# Hello\n\nBody text.\n"));
    }

    #[test]
    fn canonical_equal_to_url_is_omitted() {
        let mut r = response();
        r.canonical = Some(r.url.clone());
        assert!(!r.to_markdown_document().contains("canonical:"));
    }

    #[test]
    fn canonical_skipped_in_json_when_absent() {
        let mut r = response();
        r.canonical = None;
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("canonical").is_none());
        assert_eq!(json["platform_type"], "ssr");
        assert_eq!(json["word_count"], 3);
    }
}
