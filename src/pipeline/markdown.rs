//! Markdown converter: DOM subtree → CommonMark (with GFM tables).
//!
//! The mapping is structural and deterministic: the same subtree always
//! produces the same text.
//!
//! | HTML | Markdown |
//! |------|----------|
//! | `h1`..`h6` | `#`..`######` |
//! | `p` | paragraph |
//! | `ul` / `ol` | `-` / `1.` items, nested by indentation |
//! | `table` | pipe table, first row as header |
//! | `pre` | fenced block, language from `language-*` class |
//! | `blockquote` | `> ` lines |
//! | `strong`/`em`/`code`/`del` | `**`/`*`/`` ` ``/`~~` |
//! | `img` | `![alt](absolute-url)` |
//! | `a` | `[text](absolute-url)` |
//!
//! URLs in image and link syntax go through the same resolution as the
//! normalizer, so the Markdown never points somewhere the response lists
//! would not.
//!
//! Nesting deeper than [`MAX_DEPTH`] elements is flattened to plain text,
//! so hostile markup costs bounded stack.
//!
//! The word count is taken from the *rendered* Markdown: pulldown-cmark
//! parses it back and only text and code events count, so syntax
//! characters never inflate it.

use super::extract::is_followable;
use super::normalize::resolve;
use super::postprocess::clean_markdown;
use super::sanitize::tag_of;
use dom_query::{NodeRef, Selection};
use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Options, Parser, Tag};
use regex::Regex;
use url::Url;

/// Rendering switches.
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions<'u> {
    /// Base for relative image and link references.
    pub base: &'u Url,
    pub include_images: bool,
    pub include_links: bool,
}

/// Converter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub markdown: String,
    pub word_count: usize,
}

/// Convert `root` and its subtree to cleaned Markdown plus its word count.
pub fn convert(root: &NodeRef<'_>, opts: &ConvertOptions<'_>) -> Converted {
    let blocks = Renderer { opts }.blocks(root, 0);
    let markdown = clean_markdown(&blocks.join("\n\n"));
    let word_count = word_count(&markdown);
    Converted { markdown, word_count }
}

/// Plain-text rendering of Markdown: text and code content only. Block
/// boundaries and line breaks become spaces; inline markup ends do not, so
/// `**bold**ly` stays one word.
pub fn plain_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::End(Tag::Emphasis | Tag::Strong | Tag::Strikethrough | Tag::Link(..) | Tag::Image(..)) => {}
            Event::SoftBreak | Event::HardBreak | Event::Rule | Event::End(_) => out.push(' '),
            _ => {}
        }
    }
    out
}

/// Whitespace-separated tokens of [`plain_text`].
pub fn word_count(markdown: &str) -> usize {
    plain_text(markdown).split_whitespace().count()
}

/// Element depth past which a subtree renders as flat text.
pub const MAX_DEPTH: usize = 128;

// ── Tag classes ──────────────────────────────────────────────────────────────

/// Elements rendered by recursing into their children as blocks.
const CONTAINERS: &[&str] = &[
    "html", "body", "main", "article", "section", "div", "header", "footer", "figure", "figcaption",
    "details", "summary", "address", "center", "dl", "dd", "dt", "hgroup",
];

/// Elements that never contribute text.
const SKIPPED: &[&str] = &[
    "head", "title", "meta", "link", "video", "audio", "track", "source", "map", "area", "script", "style",
    "noscript", "template",
];

fn is_block(tag: &str) -> bool {
    CONTAINERS.contains(&tag)
        || matches!(
            tag,
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "ul" | "ol" | "table" | "pre" | "blockquote" | "hr"
        )
}

struct Renderer<'o, 'u> {
    opts: &'o ConvertOptions<'u>,
}

impl Renderer<'_, '_> {
    // ── Blocks ──────────────────────────────────────────────────────────

    /// Render the children of `node` as a list of Markdown blocks.
    fn blocks(&self, node: &NodeRef<'_>, depth: usize) -> Vec<String> {
        let mut out = Vec::new();
        if depth >= MAX_DEPTH {
            flush_paragraph(&mut flat_text(node), &mut out);
            return out;
        }
        let mut inline = String::new();

        for child in node.children() {
            if child.is_text() {
                inline.push_str(&escape_text(&child.text()));
                continue;
            }
            if !child.is_element() {
                continue;
            }
            let tag = tag_of(&child);
            if SKIPPED.contains(&tag.as_str()) {
                continue;
            }
            if !is_block(&tag) {
                inline.push_str(&self.inline_element(&child, &tag, depth + 1));
                continue;
            }
            flush_paragraph(&mut inline, &mut out);
            self.block_element(&child, &tag, &mut out, depth + 1);
        }
        flush_paragraph(&mut inline, &mut out);
        out
    }

    fn block_element(&self, node: &NodeRef<'_>, tag: &str, out: &mut Vec<String>, depth: usize) {
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag[1..].parse::<usize>().unwrap_or(1);
                let text = single_line(&self.inline(node, depth));
                if !text.is_empty() {
                    out.push(format!("{} {}", "#".repeat(level), text));
                }
            }
            "p" => {
                let text = tidy_paragraph(&self.inline(node, depth));
                if !text.is_empty() {
                    out.push(text);
                }
            }
            "ul" | "ol" => {
                let list = self.list(node, tag == "ol", "", depth);
                if !list.is_empty() {
                    out.push(list);
                }
            }
            "table" => {
                if let Some(table) = self.table(node, depth) {
                    out.push(table);
                }
            }
            "pre" => out.push(fenced_code(node)),
            "blockquote" => {
                let inner = self.blocks(node, depth).join("\n\n");
                if !inner.trim().is_empty() {
                    out.push(quote(&inner));
                }
            }
            "hr" => out.push("---".to_string()),
            _ => out.extend(self.blocks(node, depth)),
        }
    }

    /// Render a list. `indent` is the prefix for this list's items.
    fn list(&self, node: &NodeRef<'_>, ordered: bool, indent: &str, depth: usize) -> String {
        if depth >= MAX_DEPTH {
            return format!("{indent}{}", single_line(&flat_text(node))).trim_end().to_string();
        }
        let start = Selection::from(*node)
            .attr("start")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1);

        let mut lines = Vec::new();
        let items = node.children().into_iter().filter(|c| tag_of(c) == "li");
        for (i, item) in items.enumerate() {
            let marker = if ordered { format!("{}.", start + i) } else { "-".to_string() };
            let child_indent = format!("{indent}{}", " ".repeat(marker.len() + 1));

            let mut text = String::new();
            let mut nested = Vec::new();
            for child in item.children() {
                if child.is_text() {
                    text.push_str(&escape_text(&child.text()));
                    continue;
                }
                let tag = tag_of(&child);
                match tag.as_str() {
                    "ul" | "ol" => {
                        let sub = self.list(&child, tag == "ol", &child_indent, depth + 2);
                        if !sub.is_empty() {
                            nested.push(sub);
                        }
                    }
                    t if SKIPPED.contains(&t) => {}
                    t if is_block(t) => {
                        text.push(' ');
                        text.push_str(&self.inline(&child, depth + 2));
                        text.push(' ');
                    }
                    t => text.push_str(&self.inline_element(&child, t, depth + 2)),
                }
            }

            let text = escape_line_start(&single_line(&text));
            if text.is_empty() && nested.is_empty() {
                continue;
            }
            lines.push(format!("{indent}{marker} {text}").trim_end().to_string());
            lines.extend(nested);
        }
        lines.join("\n")
    }

    fn table(&self, node: &NodeRef<'_>, depth: usize) -> Option<String> {
        let mut rows: Vec<Vec<String>> = Vec::new();
        collect_rows(node, &mut |tr| {
            let cells: Vec<String> = tr
                .children()
                .into_iter()
                .filter(|c| matches!(tag_of(c).as_str(), "td" | "th"))
                .map(|cell| single_line(&self.inline(&cell, depth + 2)).replace('|', "\\|"))
                .collect();
            if !cells.is_empty() {
                rows.push(cells);
            }
        });

        let width = rows.iter().map(Vec::len).max()?;
        let mut lines = Vec::with_capacity(rows.len() + 1);
        for (i, row) in rows.iter().enumerate() {
            let mut cells = row.clone();
            cells.resize(width, String::new());
            lines.push(format!("| {} |", cells.join(" | ")));
            if i == 0 {
                lines.push(format!("|{}", " --- |".repeat(width)));
            }
        }
        Some(lines.join("\n"))
    }

    // ── Inline ──────────────────────────────────────────────────────────

    /// Inline rendering of all children of `node`.
    fn inline(&self, node: &NodeRef<'_>, depth: usize) -> String {
        if depth >= MAX_DEPTH {
            return flat_text(node);
        }
        let mut out = String::new();
        for child in node.children() {
            if child.is_text() {
                out.push_str(&escape_text(&child.text()));
            } else if child.is_element() {
                let tag = tag_of(&child);
                if SKIPPED.contains(&tag.as_str()) {
                    continue;
                }
                if is_block(&tag) && !out.ends_with(' ') {
                    out.push(' ');
                }
                out.push_str(&self.inline_element(&child, &tag, depth + 1));
                if is_block(&tag) {
                    out.push(' ');
                }
            }
        }
        out
    }

    fn inline_element(&self, node: &NodeRef<'_>, tag: &str, depth: usize) -> String {
        match tag {
            "strong" | "b" => wrap(&self.inline(node, depth), "**"),
            "em" | "i" => wrap(&self.inline(node, depth), "*"),
            "del" | "s" | "strike" => wrap(&self.inline(node, depth), "~~"),
            "code" | "kbd" | "samp" | "tt" => inline_code(&node.text()),
            "br" => "\n".to_string(),
            "img" => self.image(node),
            "a" => self.link(node, depth),
            _ if SKIPPED.contains(&tag) => String::new(),
            _ => self.inline(node, depth),
        }
    }

    fn image(&self, node: &NodeRef<'_>) -> String {
        if !self.opts.include_images {
            return String::new();
        }
        let sel = Selection::from(*node);
        let src = sel
            .attr("src")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| sel.attr("data-src"));
        let Some(url) = src.and_then(|s| resolve(self.opts.base, &s)) else {
            return String::new();
        };
        let alt = sel
            .attr("alt")
            .map(|a| single_line(&a).replace(['[', ']'], ""))
            .unwrap_or_default();
        format!("![{alt}]({})", markdown_url(&url))
    }

    fn link(&self, node: &NodeRef<'_>, depth: usize) -> String {
        let text = self.inline(node, depth);
        if !self.opts.include_links {
            return text;
        }
        let target = Selection::from(*node)
            .attr("href")
            .filter(|h| is_followable(h))
            .and_then(|h| resolve(self.opts.base, &h));
        let label = text.trim();
        match target {
            Some(url) if !label.is_empty() => {
                let lead = if text.starts_with(char::is_whitespace) { " " } else { "" };
                let trail = if text.ends_with(char::is_whitespace) { " " } else { "" };
                format!("{lead}[{label}]({}){trail}", markdown_url(&url))
            }
            _ => text,
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Visit every `tr` of `table` without descending into nested tables.
fn collect_rows(node: &NodeRef<'_>, visit: &mut dyn FnMut(&NodeRef<'_>)) {
    for child in node.children() {
        match tag_of(&child).as_str() {
            "tr" => visit(&child),
            "thead" | "tbody" | "tfoot" => collect_rows(&child, visit),
            _ => {}
        }
    }
}

/// Escaped text of the whole subtree. `NodeRef::text` walks iteratively.
fn flat_text(node: &NodeRef<'_>) -> String {
    escape_text(&node.text())
}

fn flush_paragraph(inline: &mut String, out: &mut Vec<String>) {
    let text = tidy_paragraph(inline);
    if !text.is_empty() {
        out.push(text);
    }
    inline.clear();
}

/// Collapse spaces within each line and drop empty lines.
fn tidy_paragraph(s: &str) -> String {
    s.lines()
        .map(|l| escape_line_start(&single_line(l)))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_ORDERED_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,9})([.)])(\s|$)").unwrap());

/// Escape a line-leading character that would open a block construct
/// (heading, quote, list item, setext underline, fence, table row).
fn escape_line_start(line: &str) -> String {
    if let Some(caps) = RE_ORDERED_MARKER.captures(line) {
        return format!("{}\\{}", &caps[1], &line[caps[1].len()..]);
    }
    let opens_block = match line.chars().next() {
        Some('#' | '>' | '-' | '+' | '=' | '|') => true,
        Some('~') => line.starts_with("~~~"),
        _ => false,
    };
    if opens_block {
        format!("\\{line}")
    } else {
        line.to_string()
    }
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace runs to one space (keeping edges) and escape the
/// characters that would otherwise start Markdown syntax.
fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_space = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if matches!(c, '\\' | '*' | '_' | '`' | '[' | ']' | '<') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Wrap the trimmed content in `marker`, keeping edge spaces outside.
fn wrap(content: &str, marker: &str) -> String {
    let inner = content.trim();
    if inner.is_empty() {
        return if content.is_empty() { String::new() } else { " ".to_string() };
    }
    let lead = if content.starts_with(char::is_whitespace) { " " } else { "" };
    let trail = if content.ends_with(char::is_whitespace) { " " } else { "" };
    format!("{lead}{marker}{inner}{marker}{trail}")
}

fn inline_code(raw: &str) -> String {
    let code = single_line(raw);
    if code.is_empty() {
        return String::new();
    }
    if code.contains('`') {
        format!("`` {code} ``")
    } else {
        format!("`{code}`")
    }
}

fn fenced_code(node: &NodeRef<'_>) -> String {
    let code = node.text().to_string();
    let code = code.trim_matches('\n');
    let lang = code_language(node).unwrap_or_default();
    let fence = if code.contains("```") { "~~~" } else { "```" };
    format!("{fence}{lang}\n{code}\n{fence}")
}

/// `language-x` / `lang-x` on the `pre` or its first `code` child.
fn code_language(pre: &NodeRef<'_>) -> Option<String> {
    let pre_sel = Selection::from(*pre);
    let code_sel = pre_sel.select("code").first();
    [pre_sel.attr("class"), code_sel.attr("class")]
        .into_iter()
        .flatten()
        .flat_map(|class| {
            class
                .split_whitespace()
                .filter_map(|token| {
                    token
                        .strip_prefix("language-")
                        .or_else(|| token.strip_prefix("lang-"))
                        .map(str::to_string)
                })
                .collect::<Vec<_>>()
        })
        .find(|lang| !lang.is_empty() && lang.chars().all(|c| c.is_ascii_alphanumeric() || "+-#_.".contains(c)))
}

fn quote(inner: &str) -> String {
    inner
        .lines()
        .map(|l| if l.is_empty() { ">".to_string() } else { format!("> {l}") })
        .collect::<Vec<_>>()
        .join("\n")
}

/// URLs with spaces or parentheses break `](...)`; percent-encode them.
fn markdown_url(url: &Url) -> String {
    url.as_str().replace(' ', "%20").replace('(', "%28").replace(')', "%29")
}
