//! Sanitizer: strip executable, hidden and boilerplate elements from the
//! parsed DOM.
//!
//! Everything here works on the tree html5ever built, never on the raw
//! string. A `<scr<script>ipt>` or an attribute split across lines parses to
//! whatever a browser would see, and that is what gets removed.
//!
//! ## Passes
//!
//! 1. **Denied tags**: executable, embedded and form elements go with their
//!    whole subtree.
//! 2. **Structural noise**: `nav`, `aside`, landmark roles for navigation,
//!    banners and dialogs, and anything marked hidden.
//! 3. **Class/id heuristics**: elements whose class or id tokens name a
//!    known boilerplate region (menus, cookie banners, share bars, ...).
//!    Content tags and containers of `article`/`main` are exempt.
//! 4. **Attributes**: every `on*` handler and every `javascript:` URL.
//!
//! `<head>` metadata (`title`, `meta`, `link`) is kept; the extractor reads
//! it from the cleaned tree.

use dom_query::{Document, NodeRef, Selection};
use std::collections::HashSet;
use tracing::trace;

/// Tags removed with their subtree.
const DENIED_TAGS: &str = "script, style, noscript, template, iframe, frame, frameset, object, embed, \
     applet, svg, canvas, input, button, select, textarea, option, dialog";

/// Structural boilerplate removed regardless of class names.
const STRUCTURAL_NOISE: &str = "nav, aside, [role=navigation], [role=banner], [role=contentinfo], \
     [role=complementary], [role=dialog], [role=alertdialog], [hidden], [aria-hidden=true]";

/// Class/id tokens that mark non-content regions.
pub const NOISE_KEYWORDS: &[&str] = &[
    "nav",
    "navbar",
    "navigation",
    "menu",
    "sidebar",
    "side-bar",
    "banner",
    "popup",
    "modal",
    "cookie",
    "gdpr",
    "ads",
    "advertisement",
    "tracking",
    "footer",
    "header",
    "breadcrumb",
    "pagination",
    "social",
    "share",
    "related",
    "recommend",
    "subscribe",
    "newsletter",
    "promo",
    "overlay",
];

/// Keywords that only count outside `article`/`main`; an article's own
/// header and footer are content.
const CONTEXTUAL_KEYWORDS: &[&str] = &["header", "footer"];

/// Tags never removed by the class/id pass.
const EXEMPT_TAGS: &[&str] = &[
    "html", "head", "body", "main", "article", "h1", "h2", "h3", "h4", "h5", "h6", "p", "table", "thead",
    "tbody", "tfoot", "tr", "td", "th", "img", "picture", "video", "source", "figure",
];

/// URL-bearing attributes checked for script schemes.
const URL_ATTRS: &[&str] = &["href", "src", "action", "formaction", "xlink:href", "data-src"];

/// Parse `html` and return the cleaned document.
pub fn sanitize(html: &str) -> Document {
    let doc = Document::from(html);
    sanitize_document(&doc);
    doc
}

/// Clean an already-parsed document in place.
pub fn sanitize_document(doc: &Document) {
    doc.select(DENIED_TAGS).remove();
    doc.select(STRUCTURAL_NOISE).remove();
    remove_header_footer_outside_content(doc);
    remove_noise_by_class(doc);
    strip_unsafe_attributes(doc);
}

/// `<header>`/`<footer>` elements are site chrome unless they sit inside
/// the article itself.
fn remove_header_footer_outside_content(doc: &Document) {
    let candidates: Vec<NodeRef> = doc.select("header, footer").nodes().to_vec();
    for node in candidates {
        if !has_content_ancestor(&node) && !contains_content(&node) {
            Selection::from(node).remove();
        }
    }
}

fn remove_noise_by_class(doc: &Document) {
    let keywords: HashSet<&str> = NOISE_KEYWORDS.iter().copied().collect();
    let candidates: Vec<NodeRef> = doc.select("[class], [id]").nodes().to_vec();

    let mut removed = 0usize;
    for node in candidates {
        let tag = tag_of(&node);
        if EXEMPT_TAGS.contains(&tag.as_str()) {
            continue;
        }
        let sel = Selection::from(node);
        let class = sel.attr("class").map(|v| v.to_string()).unwrap_or_default();
        let id = sel.attr("id").map(|v| v.to_string()).unwrap_or_default();

        let hits = noise_hits(&keywords, &class, &id);
        if hits.is_empty() {
            continue;
        }
        let only_contextual = hits.iter().all(|h| CONTEXTUAL_KEYWORDS.contains(h));
        if only_contextual && has_content_ancestor(&node) {
            continue;
        }
        if contains_content(&node) {
            continue;
        }
        trace!(tag = %tag, class = %class, id = %id, "removing noise element");
        sel.remove();
        removed += 1;
    }
    trace!(removed, "class/id noise pass done");
}

/// Keywords matched by the class or id tokens of an element.
///
/// A value like `site-header main_nav` yields the tokens `site-header`,
/// `site`, `header`, `main_nav`, `main`, `nav`. Whole tokens and their
/// `-`/`_` parts both count, so `side-bar` and `sidebar` both match while
/// `heads` or `uploads` do not.
fn noise_hits<'k>(keywords: &HashSet<&'k str>, class: &str, id: &str) -> Vec<&'k str> {
    let mut hits = Vec::new();
    for word in class.split_whitespace().chain(id.split_whitespace()) {
        let word = word.to_ascii_lowercase();
        let parts = std::iter::once(word.as_str()).chain(word.split(['-', '_']));
        for part in parts {
            if let Some(k) = keywords.get(part) {
                if !hits.contains(k) {
                    hits.push(*k);
                }
            }
        }
    }
    hits
}

fn strip_unsafe_attributes(doc: &Document) {
    let elements: Vec<NodeRef> = doc.select("*").nodes().to_vec();
    for node in elements {
        let doomed: Vec<String> = node
            .attrs()
            .iter()
            .filter_map(|attr| {
                let name = attr.name.local.as_ref().to_ascii_lowercase();
                let unsafe_attr = name.starts_with("on")
                    || (URL_ATTRS.contains(&name.as_str()) && is_script_url(&attr.value));
                unsafe_attr.then(|| attr.name.local.to_string())
            })
            .collect();
        if doomed.is_empty() {
            continue;
        }
        let sel = Selection::from(node);
        for name in doomed {
            sel.remove_attr(&name);
        }
    }
}

/// True for `javascript:`/`vbscript:` URLs, including the whitespace and
/// case tricks browsers tolerate (`  JaVa\tScript:`).
pub fn is_script_url(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.starts_with("javascript:") || compact.starts_with("vbscript:")
}

// ── Tree helpers ─────────────────────────────────────────────────────────────

pub(crate) fn tag_of(node: &NodeRef) -> String {
    node.node_name()
        .map(|t| t.to_ascii_lowercase())
        .unwrap_or_default()
}

fn has_content_ancestor(node: &NodeRef) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        if matches!(tag_of(&n).as_str(), "article" | "main") {
            return true;
        }
        current = n.parent();
    }
    false
}

fn contains_content(node: &NodeRef) -> bool {
    Selection::from(*node).select("article, main").exists()
}
