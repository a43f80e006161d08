//! Extractor: page metadata plus the main-content region.
//!
//! ## Scoring
//!
//! The main-content heuristic is a pure function over [`ContentNode`], a
//! minimal tree capability (tag, children, text, class hint). The DOM
//! implements it for [`NodeRef`]; tests implement it for hand-built trees.
//!
//! 1. Every paragraph-like element (`p`, `pre`, `td`, `blockquote`, and
//!    headings at half weight) with at least [`MIN_PARAGRAPH_CHARS`] of text
//!    is worth `1 + commas + min(chars / 100, 3)`.
//! 2. That value goes in full to its parent and half to its grandparent.
//!    A node's first score starts from a tag bonus (article > main > div >
//!    section) plus a class/id hint of ±25.
//! 3. Each candidate's total is scaled by `1 - link_density`, so link
//!    farms (menus, tag clouds) sink.
//! 4. The highest total wins; on a tie the earlier node in document order
//!    wins. A winner at or below the threshold is no winner at all.
//!
//! When nothing qualifies the caller gets the whole `<body>` and
//! `main_is_fallback` is set.

use super::sanitize::is_script_url;
use crate::error::Web2MdError;
use dom_query::{Document, NodeRef, Selection};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Shortest text that counts as a paragraph.
pub const MIN_PARAGRAPH_CHARS: usize = 25;

/// Tree capability the scorer needs. `Clone` should be cheap (a handle).
pub trait ContentNode: Clone {
    /// Lower-case tag name, or `None` for text and other non-element nodes.
    fn tag_name(&self) -> Option<String>;

    /// Direct children in document order.
    fn child_nodes(&self) -> Vec<Self>;

    /// Concatenated text of this node and all descendants.
    fn text_content(&self) -> String;

    /// `class` and `id` joined by a space.
    fn class_hint(&self) -> String {
        String::new()
    }
}

impl<'a> ContentNode for NodeRef<'a> {
    fn tag_name(&self) -> Option<String> {
        if !self.is_element() {
            return None;
        }
        self.node_name().map(|n| n.to_ascii_lowercase())
    }

    fn child_nodes(&self) -> Vec<Self> {
        self.children()
            .into_iter()
            .filter(|n| n.is_element() || n.is_text())
            .collect()
    }

    fn text_content(&self) -> String {
        self.text().to_string()
    }

    fn class_hint(&self) -> String {
        let sel = Selection::from(*self);
        let class = sel.attr("class").map(|v| v.to_string()).unwrap_or_default();
        let id = sel.attr("id").map(|v| v.to_string()).unwrap_or_default();
        format!("{class} {id}")
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

static RE_POSITIVE_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|h-entry|main|page|post|text|blog|story").unwrap()
});

static RE_NEGATIVE_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)hidden|banner|combx|comment|com-|contact|foot|masthead|media|meta|outbrain|promo|related|scroll|share|shoutbox|sidebar|skyscraper|sponsor|shopping|tags|tool|widget",
    )
    .unwrap()
});

fn tag_bonus(tag: &str) -> f64 {
    match tag {
        "article" => 10.0,
        "main" => 8.0,
        "div" => 5.0,
        "section" => 3.0,
        "blockquote" | "td" | "pre" => 3.0,
        "ul" | "ol" | "li" | "dl" | "dd" | "dt" | "form" | "address" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    }
}

fn class_weight(hint: &str) -> f64 {
    let hint = hint.trim();
    if hint.is_empty() {
        return 0.0;
    }
    let mut weight = 0.0;
    if RE_NEGATIVE_HINT.is_match(hint) {
        weight -= 25.0;
    }
    if RE_POSITIVE_HINT.is_match(hint) {
        weight += 25.0;
    }
    weight
}

/// Weight of a paragraph-like tag, or `None` if the tag never counts.
fn paragraph_weight(tag: &str) -> Option<f64> {
    match tag {
        "p" | "pre" | "td" | "blockquote" => Some(1.0),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some(0.5),
        _ => None,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn text_len<N: ContentNode>(node: &N) -> usize {
    collapse_whitespace(&node.text_content()).chars().count()
}

/// Characters of text inside `<a>` descendants of `node`.
fn link_text_len<N: ContentNode>(node: &N) -> usize {
    let mut total = 0;
    let mut stack = node.child_nodes();
    while let Some(child) = stack.pop() {
        match child.tag_name().as_deref() {
            Some("a") => total += text_len(&child),
            Some(_) => stack.extend(child.child_nodes()),
            None => {}
        }
    }
    total
}

/// Fraction of `node`'s text that sits inside links, in `0.0..=1.0`.
pub fn link_density<N: ContentNode>(node: &N) -> f64 {
    let total = text_len(node);
    if total == 0 {
        return 0.0;
    }
    (link_text_len(node) as f64 / total as f64).min(1.0)
}

struct Flat<N> {
    node: N,
    tag: String,
    parent: Option<usize>,
}

/// Elements under `root` (inclusive) in document order, with parent links.
fn flatten<N: ContentNode>(root: &N) -> Vec<Flat<N>> {
    let mut out = Vec::new();
    let mut stack: Vec<(N, Option<usize>)> = vec![(root.clone(), None)];
    while let Some((node, parent)) = stack.pop() {
        let Some(tag) = node.tag_name() else { continue };
        let idx = out.len();
        let children = node.child_nodes();
        out.push(Flat { node, tag, parent });
        for child in children.into_iter().rev() {
            stack.push((child, Some(idx)));
        }
    }
    out
}

/// Every scored candidate under `root` with its final score, in document
/// order.
pub fn score_candidates<N: ContentNode>(root: &N) -> Vec<(N, f64)> {
    let flat = flatten(root);
    let mut scores: Vec<Option<f64>> = vec![None; flat.len()];

    let credit = |idx: usize, amount: f64, scores: &mut Vec<Option<f64>>| {
        let entry = scores[idx]
            .get_or_insert_with(|| tag_bonus(&flat[idx].tag) + class_weight(&flat[idx].node.class_hint()));
        *entry += amount;
    };

    for item in &flat {
        let Some(weight) = paragraph_weight(&item.tag) else { continue };
        let text = collapse_whitespace(&item.node.text_content());
        let len = text.chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let commas = text.matches([',', '，']).count() as f64;
        let value = weight * (1.0 + commas + (len as f64 / 100.0).floor().min(3.0));

        if let Some(parent) = item.parent {
            credit(parent, value, &mut scores);
            if let Some(grandparent) = flat[parent].parent {
                credit(grandparent, value / 2.0, &mut scores);
            }
        }
    }

    flat.into_iter()
        .zip(scores)
        .filter_map(|(item, score)| {
            let score = score?;
            let adjusted = score * (1.0 - link_density(&item.node));
            Some((item.node, adjusted))
        })
        .collect()
}

/// Pick the main-content node under `root`.
///
/// Returns [`Web2MdError::ExtractionEmpty`] when no candidate scores above
/// `min_score`.
pub fn best_candidate<N: ContentNode>(root: &N, min_score: f64) -> Result<(N, f64), Web2MdError> {
    let mut best: Option<(N, f64)> = None;
    for (node, score) in score_candidates(root) {
        let better = match &best {
            Some((_, top)) => score > *top,
            None => true,
        };
        if better {
            best = Some((node, score));
        }
    }
    match best {
        Some((node, score)) if score > min_score => Ok((node, score)),
        _ => Err(Web2MdError::ExtractionEmpty { threshold: min_score }),
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

/// Metadata and main content of one page. Borrows the document.
#[derive(Clone)]
pub struct ExtractedContent<'a> {
    pub title: String,
    pub description: String,
    /// Raw canonical reference (`link[rel=canonical]`, else `og:url`).
    pub canonical: Option<String>,
    /// Main-content subtree.
    pub main: NodeRef<'a>,
    /// True when no subtree scored above the threshold and `main` is the
    /// whole body.
    pub main_is_fallback: bool,
    /// Raw image references inside `main`, in document order.
    pub images: Vec<String>,
    /// Raw video references inside `main`, in document order.
    pub videos: Vec<String>,
    /// Raw link targets inside `main`, in document order.
    pub links: Vec<String>,
}

/// Extract metadata and the main content region from a sanitized document.
pub fn extract(doc: &Document, min_score: f64) -> ExtractedContent<'_> {
    let body = doc.select("body").nodes().first().copied().unwrap_or_else(|| doc.root());

    let (main, main_is_fallback) = match best_candidate(&body, min_score) {
        Ok((node, score)) => {
            debug!(tag = ?node.tag_name(), score, "main content selected");
            (node, false)
        }
        Err(e) => {
            debug!(error = %e, "falling back to whole body");
            (body, true)
        }
    };

    let scope = Selection::from(main);
    ExtractedContent {
        title: extract_title(doc),
        description: extract_description(doc),
        canonical: extract_canonical(doc),
        main,
        main_is_fallback,
        images: image_refs(&scope),
        videos: video_refs(&scope),
        links: link_refs(&scope),
    }
}

fn non_empty_attr(sel: &Selection, name: &str) -> Option<String> {
    sel.attr(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn extract_title(doc: &Document) -> String {
    let title = collapse_whitespace(&doc.select("title").text());
    if !title.is_empty() {
        return title;
    }
    collapse_whitespace(&doc.select("h1, h2, h3, h4, h5, h6").first().text())
}

fn meta_content(doc: &Document, attr: &str, value: &str) -> Option<String> {
    doc.select(&format!("meta[{attr}]"))
        .nodes()
        .iter()
        .map(|n| Selection::from(*n))
        .find(|m| {
            m.attr(attr)
                .map(|v| v.trim().eq_ignore_ascii_case(value))
                .unwrap_or(false)
        })
        .and_then(|m| non_empty_attr(&m, "content"))
}

fn extract_description(doc: &Document) -> String {
    meta_content(doc, "name", "description")
        .or_else(|| meta_content(doc, "property", "og:description"))
        .map(|d| collapse_whitespace(&d))
        .unwrap_or_default()
}

fn extract_canonical(doc: &Document) -> Option<String> {
    let from_link = doc
        .select("link[rel]")
        .nodes()
        .iter()
        .map(|n| Selection::from(*n))
        .find(|l| {
            l.attr("rel")
                .map(|rel| rel.split_whitespace().any(|t| t.eq_ignore_ascii_case("canonical")))
                .unwrap_or(false)
        })
        .and_then(|l| non_empty_attr(&l, "href"));
    from_link.or_else(|| meta_content(doc, "property", "og:url"))
}

fn image_refs(scope: &Selection) -> Vec<String> {
    scope
        .select("img")
        .nodes()
        .iter()
        .filter_map(|n| {
            let img = Selection::from(*n);
            non_empty_attr(&img, "src").or_else(|| non_empty_attr(&img, "data-src"))
        })
        .collect()
}

fn video_refs(scope: &Selection) -> Vec<String> {
    let mut out = Vec::new();
    for node in scope.select("video").nodes() {
        let video = Selection::from(*node);
        if let Some(src) = non_empty_attr(&video, "src") {
            out.push(src);
        }
        for source in video.select("source").nodes() {
            if let Some(src) = non_empty_attr(&Selection::from(*source), "src") {
                out.push(src);
            }
        }
    }
    out
}

/// `a[href]` targets, minus in-page anchors and non-navigational schemes.
fn link_refs(scope: &Selection) -> Vec<String> {
    scope
        .select("a[href]")
        .nodes()
        .iter()
        .filter_map(|n| non_empty_attr(&Selection::from(*n), "href"))
        .filter(|href| is_followable(href))
        .collect()
}

pub(crate) fn is_followable(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    !(lower.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
        || is_script_url(href))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sanitize::sanitize;

    /// Hand-built tree for exercising the scorer without a parser.
    #[derive(Debug)]
    struct TestNode {
        tag: Option<&'static str>,
        class: &'static str,
        text: String,
        children: Vec<TestNode>,
    }

    fn el(tag: &'static str, class: &'static str, children: Vec<TestNode>) -> TestNode {
        TestNode { tag: Some(tag), class, text: String::new(), children }
    }

    fn txt(s: &str) -> TestNode {
        TestNode { tag: None, class: "", text: s.to_string(), children: vec![] }
    }

    fn para(s: &str) -> TestNode {
        el("p", "", vec![txt(s)])
    }

    fn link(s: &str) -> TestNode {
        el("a", "", vec![txt(s)])
    }

    impl<'a> ContentNode for &'a TestNode {
        fn tag_name(&self) -> Option<String> {
            self.tag.map(str::to_string)
        }
        fn child_nodes(&self) -> Vec<Self> {
            let node: &'a TestNode = self;
            node.children.iter().collect()
        }
        fn text_content(&self) -> String {
            if self.tag.is_none() {
                return self.text.clone();
            }
            self.children.iter().map(|c| c.text_content()).collect::<Vec<_>>().join(" ")
        }
        fn class_hint(&self) -> String {
            self.class.to_string()
        }
    }

    const LONG: &str = "The quick brown fox jumps over the lazy dog, twice, and then rests for a while.";

    #[test]
    fn article_beats_link_heavy_menu() {
        let menu = el(
            "div",
            "",
            vec![
                el("p", "", vec![link("Home page of this fine website here"), link("About the company and its people")]),
                el("p", "", vec![link("Careers at the company, all of them"), link("Contact information for everyone")]),
            ],
        );
        let article = el("article", "", vec![para(LONG), para(LONG)]);
        let body = el("body", "", vec![menu, article]);

        let (best, _) = best_candidate(&&body, 10.0).unwrap();
        assert_eq!(best.tag, Some("article"));
    }

    #[test]
    fn ties_go_to_the_earliest_node() {
        let first = el("div", "", vec![para(LONG)]);
        let second = el("div", "", vec![para(LONG)]);
        let body = el("section", "", vec![first, second]);
        let scored = score_candidates(&&body);
        let divs: Vec<f64> = scored.iter().filter(|(n, _)| n.tag == Some("div")).map(|(_, s)| *s).collect();
        assert_eq!(divs.len(), 2);
        assert_eq!(divs[0], divs[1]);

        let (best, _) = best_candidate(&&body, 0.0).unwrap();
        assert!(std::ptr::eq(best, &body.children[0]), "expected the first div");
    }

    #[test]
    fn short_paragraphs_do_not_count() {
        let body = el("body", "", vec![el("div", "", vec![para("too short")])]);
        assert!(score_candidates(&&body).is_empty());
        let err = best_candidate(&&body, 10.0).unwrap_err();
        assert!(matches!(err, Web2MdError::ExtractionEmpty { .. }));
    }

    #[test]
    fn negative_class_hint_sinks_candidate() {
        let sidebar = el("div", "sidebar widget", vec![para(LONG), para(LONG), para(LONG)]);
        let content = el("div", "post-content", vec![para(LONG)]);
        let body = el("body", "", vec![sidebar, content]);
        let (best, _) = best_candidate(&&body, 0.0).unwrap();
        assert_eq!(best.class, "post-content");
    }

    #[test]
    fn link_density_is_fraction_of_linked_text() {
        let node = el("div", "", vec![txt("abcd"), link("efgh")]);
        let d = link_density(&&node);
        assert!((d - 0.5).abs() < 0.15, "density {d}");
        assert_eq!(link_density(&&el("div", "", vec![])), 0.0);
    }

    #[test]
    fn threshold_is_exclusive() {
        let body = el("body", "", vec![el("article", "", vec![para(LONG)])]);
        let (_, score) = best_candidate(&&body, 0.0).unwrap();
        assert!(best_candidate(&&body, score).is_err());
    }

    // ── Over the real DOM ───────────────────────────────────────────────

    const PAGE: &str = r##"<html><head>
        <title>  My   Article </title>
        <meta name="Description" content="A short summary">
        <link rel="canonical" href="/articles/my-article">
      </head><body>
        <div class="links"><a href="/a">A</a> <a href="/b">B</a></div>
        <article>
          <h1>Heading</h1>
          <p>First paragraph with enough words to be counted, clearly.</p>
          <p>Second paragraph, also long enough to count for the score.</p>
          <img src="photo.jpg" alt="Photo">
          <img data-src="/lazy.png">
          <video src="/clip.mp4"><source src="/clip.webm"></video>
          <a href="/next">Next</a> <a href="#top">Top</a> <a href="mailto:x@y.z">Mail</a>
        </article>
      </body></html>"##;

    #[test]
    fn extracts_metadata_and_main_region() {
        let doc = sanitize(PAGE);
        let extracted = extract(&doc, 10.0);
        assert_eq!(extracted.title, "My Article");
        assert_eq!(extracted.description, "A short summary");
        assert_eq!(extracted.canonical.as_deref(), Some("/articles/my-article"));
        assert!(!extracted.main_is_fallback);
        assert_eq!(extracted.main.tag_name().as_deref(), Some("article"));
        assert_eq!(extracted.images, vec!["photo.jpg", "/lazy.png"]);
        assert_eq!(extracted.videos, vec!["/clip.mp4", "/clip.webm"]);
        assert_eq!(extracted.links, vec!["/next"]);
    }

    #[test]
    fn title_falls_back_to_first_heading() {
        let doc = sanitize("<html><body><h2>Sub  heading</h2><h1>Later</h1></body></html>");
        assert_eq!(extract(&doc, 10.0).title, "Sub heading");
    }

    #[test]
    fn missing_description_is_empty() {
        let doc = sanitize("<html><head><title>T</title></head><body><p>x</p></body></html>");
        assert_eq!(extract(&doc, 10.0).description, "");
    }

    #[test]
    fn og_url_is_canonical_fallback() {
        let doc = sanitize(r#"<html><head><meta property="og:url" content="https://e.com/x"></head><body></body></html>"#);
        assert_eq!(extract(&doc, 10.0).canonical.as_deref(), Some("https://e.com/x"));
    }

    #[test]
    fn falls_back_to_body_when_nothing_scores() {
        let doc = sanitize("<html><body><p>tiny</p></body></html>");
        let extracted = extract(&doc, 10.0);
        assert!(extracted.main_is_fallback);
        assert_eq!(extracted.main.tag_name().as_deref(), Some("body"));
    }

    #[test]
    fn deeply_nested_markup_is_scored_without_recursion() {
        let depth = 20_000;
        let html = format!(
            "<html><body>{}<p>{LONG}</p><a href=\"/x\">link</a>{}</body></html>",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );
        let doc = sanitize(&html);
        let body = doc.select("body").nodes().first().copied().unwrap();
        let density = link_density(&body);
        assert!(density > 0.0 && density < 0.2, "density = {density}");
        let extracted = extract(&doc, 5.0);
        assert!(!extracted.main_is_fallback);
        assert_eq!(extracted.main.tag_name().as_deref(), Some("div"));
        assert_eq!(extracted.links, vec!["/x"]);
    }
}
