//! URL normalizer: resolve raw media and link references against the final
//! fetched URL.
//!
//! Resolution follows RFC 3986 through [`Url::join`], so `../x`, `//cdn/x`
//! and `?q` behave as they would in a browser. The base is the URL the fetch
//! ended on, not the one requested, so pages behind redirects resolve
//! correctly. Only `http`/`https` results survive.

use super::extract::ExtractedContent;
use std::collections::HashSet;
use url::Url;

/// Absolute, deduplicated media and link lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedMedia {
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub links: Vec<String>,
}

/// Resolve one reference. `None` for unparsable input and for any scheme
/// other than http(s).
pub fn resolve(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    let url = base.join(reference).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Resolve every reference in `raw`, dropping rejects and duplicates while
/// keeping first-seen order.
pub fn resolve_all<'r>(base: &Url, raw: impl IntoIterator<Item = &'r str>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|r| resolve(base, r))
        .map(String::from)
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

/// Normalize the media and link lists of `extracted` against `base`.
pub fn normalize(extracted: &ExtractedContent<'_>, base: &Url) -> NormalizedMedia {
    NormalizedMedia {
        images: resolve_all(base, extracted.images.iter().map(String::as_str)),
        videos: resolve_all(base, extracted.videos.iter().map(String::as_str)),
        links: resolve_all(base, extracted.links.iter().map(String::as_str)),
    }
}

/// Resolve a canonical reference the same way as media.
pub fn normalize_canonical(raw: Option<&str>, base: &Url) -> Option<String> {
    raw.and_then(|r| resolve(base, r)).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/a/b").unwrap()
    }

    #[test]
    fn root_relative_reference() {
        assert_eq!(resolve(&base(), "/img.png").unwrap().as_str(), "https://example.com/img.png");
    }

    #[test]
    fn path_relative_and_parent_references() {
        assert_eq!(resolve(&base(), "photo.jpg").unwrap().as_str(), "https://example.com/a/photo.jpg");
        assert_eq!(resolve(&base(), "../up.png").unwrap().as_str(), "https://example.com/up.png");
        assert_eq!(resolve(&base(), "//cdn.example.net/x.png").unwrap().as_str(), "https://cdn.example.net/x.png");
    }

    #[test]
    fn non_http_schemes_are_dropped() {
        for r in ["data:image/png;base64,AAAA", "javascript:alert(1)", "mailto:a@b.c", "ftp://files/x", ""] {
            assert!(resolve(&base(), r).is_none(), "{r}");
        }
    }

    #[test]
    fn dedup_keeps_first_seen_order() {
        let out = resolve_all(&base(), ["/b.png", "/a.png", "https://example.com/b.png", "b.png", "/a.png"]);
        assert_eq!(
            out,
            vec!["https://example.com/b.png", "https://example.com/a.png", "https://example.com/a/b.png"]
        );
    }

    #[test]
    fn canonical_resolution() {
        assert_eq!(
            normalize_canonical(Some("/canon"), &base()).as_deref(),
            Some("https://example.com/canon")
        );
        assert_eq!(normalize_canonical(None, &base()), None);
    }
}
