//! Post-processing: deterministic cleanup of converter output.
//!
//! ## Why a separate pass?
//!
//! The converter maps DOM structure faithfully, and faithful is not always
//! clean. Pages leak boilerplate the sanitizer cannot see structurally
//! (cookie notices inside article text, Cloudflare's `[email protected]`
//! placeholders, entity-encoded punctuation), and whitespace decisions made
//! node by node leave runs of blank lines. These rules fix that on the text,
//! each as a pure `&str → String` function that can be tested on its own.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so every later rule sees `\n` only.
//! Every other rule runs outside fenced code blocks (backtick or tilde
//! fences, also inside `>` quotes); code is never rewritten. Blank-line
//! collapsing runs after the removals, because removing a sentence can
//! leave an empty line behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to converted Markdown.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 3. Remove Cloudflare e-mail obfuscation placeholders
/// 4. Remove bare `tel:` URIs left in text
/// 5. Decode or drop stray numeric HTML entities
/// 6. Remove cookie-consent sentences
/// 7. Remove links with an empty label
/// 8. Trim trailing whitespace per line
/// 9. Collapse 3+ consecutive newlines down to 2
/// 10. Trim leading and trailing blank space
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = map_outside_fences(&s, |text| {
        let t = remove_invisible_chars(text);
        let t = remove_email_placeholders(&t);
        let t = remove_tel_uris(&t);
        let t = decode_numeric_entities(&t);
        let t = remove_cookie_sentences(&t);
        let t = remove_empty_links(&t);
        trim_trailing_whitespace(&t)
    });
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Fence handling ───────────────────────────────────────────────────────────

/// Tracks whether the current line sits inside a fenced code block.
#[derive(Default)]
pub(crate) struct FenceTracker {
    /// Marker character and run length of the open fence.
    open: Option<(char, usize)>,
}

impl FenceTracker {
    /// Feed the next line; true when it is a fence line or fenced code.
    pub(crate) fn is_code(&mut self, line: &str) -> bool {
        let marker = fence_marker(line);
        match (self.open, marker) {
            (Some((ch, len)), Some((m, n, rest))) if m == ch && n >= len && rest.trim().is_empty() => {
                self.open = None;
                true
            }
            (Some(_), _) => true,
            (None, Some((m, n, rest))) if m == '~' || !rest.contains('`') => {
                self.open = Some((m, n));
                true
            }
            (None, _) => false,
        }
    }
}

/// Fence character, run length and the text after the run, if `line`
/// (after any `>` quote markers) starts with three or more `` ` `` or `~`.
fn fence_marker(line: &str) -> Option<(char, usize, &str)> {
    let body = line.trim_start_matches(|c: char| c == '>' || c == ' ' || c == '\t');
    let ch = body.chars().next().filter(|c| matches!(c, '`' | '~'))?;
    let len = body.chars().take_while(|&c| c == ch).count();
    (len >= 3).then(|| (ch, len, &body[len..]))
}

/// Apply `f` to every region outside fenced code, leaving the code intact.
fn map_outside_fences(input: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prose = String::new();
    let mut fences = FenceTracker::default();

    for line in input.split_inclusive('\n') {
        if fences.is_code(line) {
            if !prose.is_empty() {
                out.push_str(&f(&prose));
                prose.clear();
            }
            out.push_str(line);
        } else {
            prose.push_str(line);
        }
    }
    out.push_str(&f(&prose));
    out
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Cloudflare e-mail placeholders ──────────────────────────────────

static RE_EMAIL_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\?\[email(?:\s|\x{00A0}|&#160;|&nbsp;)+protected\\?\]").unwrap()
});

fn remove_email_placeholders(input: &str) -> String {
    RE_EMAIL_PLACEHOLDER.replace_all(input, "").to_string()
}

// ── Rule 4: Bare tel: URIs ──────────────────────────────────────────────────

static RE_TEL_URI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\btel:[+\d%().\-]+").unwrap());

fn remove_tel_uris(input: &str) -> String {
    RE_TEL_URI.replace_all(input, "").to_string()
}

// ── Rule 5: Numeric HTML entities ───────────────────────────────────────────
//
// Double-encoded pages leave `&#36;10&#46;99` in text nodes. Printable ASCII
// code points are decoded; anything else is dropped. A decoded character
// that would read as Markdown syntax is backslash-escaped.

static RE_NUMERIC_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").unwrap());

fn decode_numeric_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in RE_NUMERIC_ENTITY.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&input[last..whole.start()]);
        last = whole.end();
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        match code.and_then(char::from_u32) {
            Some(c) if c == ' ' || c.is_ascii_graphic() => push_literal(&mut out, c, &input[last..]),
            Some('\u{00A0}') => out.push(' '),
            _ => {}
        }
    }
    out.push_str(&input[last..]);
    out
}

/// Push a decoded `c` so it renders as itself. `rest` is the input that
/// follows it.
fn push_literal(out: &mut String, c: char, rest: &str) {
    let line = out[out.rfind('\n').map_or(0, |i| i + 1)..].trim_start();
    let at_line_start = line.is_empty();
    let after_number = !line.is_empty() && line.chars().all(|d| d.is_ascii_digit());

    let escape = matches!(c, '\\' | '*' | '_' | '`' | '[' | ']' | '<')
        || (at_line_start && matches!(c, '#' | '>' | '-' | '+' | '=' | '|' | '~'))
        || (after_number && matches!(c, '.' | ')'));
    if escape {
        out.push('\\');
    }
    out.push(c);
    // A decoded digit that starts a line and is followed by `.` or `)`
    // would open an ordered list.
    if c.is_ascii_digit() && (at_line_start || after_number) && rest.starts_with(['.', ')']) {
        out.push('\\');
    }
}

// ── Rule 6: Cookie-consent sentences ────────────────────────────────────────

static RE_COOKIE_SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[^.!?\n\[\]()]*\b(?:(?:this|our) (?:web)?site uses cookies|we use cookies|accept (?:all )?cookies|cookie (?:policy|settings|preferences))\b[^.!?\n\[\]()]*[.!?]?",
    )
    .unwrap()
});

fn remove_cookie_sentences(input: &str) -> String {
    RE_COOKIE_SENTENCE.replace_all(input, "").to_string()
}

// ── Rule 7: Empty links ─────────────────────────────────────────────────────

static RE_EMPTY_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^!])\[\s*\]\([^)]*\)[ \t]?").unwrap());

fn remove_empty_links(input: &str) -> String {
    RE_EMPTY_LINK.replace_all(input, "${1}").to_string()
}

// ── Rule 8: Trim trailing whitespace per line ────────────────────────────────

static RE_TRAILING_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)[^\S\n]+$").unwrap());

fn trim_trailing_whitespace(input: &str) -> String {
    RE_TRAILING_WS.replace_all(input, "").to_string()
}

// ── Rule 9: Collapse excessive blank lines ───────────────────────────────────

/// Keep at most one blank line in a row outside fenced code.
fn collapse_blank_lines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut fences = FenceTracker::default();
    let mut blank_run = 0;
    for line in input.split_inclusive('\n') {
        if fences.is_code(line) {
            blank_run = 0;
        } else if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_removes_email_placeholder_variants() {
        for text in [
            "Contact us at [email\u{00a0}protected] for support.",
            "Send a message to [email protected].",
            "Write to [email&#160;protected] today.",
            r"Escaped \[email protected\] too.",
        ] {
            let out = clean_markdown(text);
            assert!(!out.contains("protected"), "got: {out}");
        }
        let out = clean_markdown("Call us or email [email\u{00a0}protected] or visit our office.");
        assert!(out.contains("Call us or email"));
        assert!(out.contains("or visit our office"));
    }

    #[test]
    fn test_removes_tel_uri() {
        let out = clean_markdown("Phone: tel:+1%20555%20123%204567 available 9-5.");
        assert!(!out.contains("tel:"), "got: {out}");
        assert!(out.contains("available 9-5."));
    }

    #[test]
    fn test_decodes_numeric_entities() {
        assert_eq!(clean_markdown("Price&#58; &#36;10&#46;99"), "Price: $10.99");
        assert_eq!(clean_markdown("a&#x2F;b&#8203;c"), "a/bc");
    }

    #[test]
    fn test_removes_cookie_sentences() {
        for text in [
            "This website uses cookies to improve your experience.",
            "We use cookies to personalise content and ads.",
            "Click here to accept all cookies and continue browsing.",
            "Read our cookie policy for more information.",
        ] {
            assert_eq!(clean_markdown(text), "", "input: {text}");
        }
        let out = clean_markdown("Intro text. We use cookies for analytics. Outro text.");
        assert!(out.contains("Intro text."));
        assert!(out.contains("Outro text."));
        assert!(!out.contains("cookies"));
    }

    #[test]
    fn test_cookie_link_removed_whole() {
        let out = clean_markdown("Text. [Cookie policy](https://example.com/cookies) More.");
        assert!(!out.contains("cookies"), "got: {out}");
        assert!(out.contains("More."));
    }

    #[test]
    fn test_preserves_unrelated_content() {
        let text = "## Main Article\n\nThis is the actual article content about cooking.";
        assert_eq!(clean_markdown(text), text);
    }

    #[test]
    fn test_removes_empty_links_but_not_images() {
        let out = clean_markdown("Some text [  ](https://example.com) more text.");
        assert_eq!(out, "Some text more text.");
        let out = clean_markdown("![](https://cdn.example.com/a.png)");
        assert_eq!(out, "![](https://cdn.example.com/a.png)");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(
            clean_markdown("First paragraph.\n\n\n\n\nSecond paragraph."),
            "First paragraph.\n\nSecond paragraph."
        );
        assert_eq!(
            clean_markdown("Paragraph one.\n\nParagraph two."),
            "Paragraph one.\n\nParagraph two."
        );
    }

    #[test]
    fn test_strips_surrounding_whitespace() {
        assert_eq!(clean_markdown("   \n\nHello world.\n\n   "), "Hello world.");
        assert_eq!(clean_markdown(""), "");
    }

    #[test]
    fn test_code_fences_untouched() {
        let md = "Text.\n\n```\nWe use cookies in this sample &#36;\n```\n\nMore.";
        let out = clean_markdown(md);
        assert!(out.contains("We use cookies in this sample &#36;"), "got: {out}");
    }

    #[test]
    fn test_tilde_fences_untouched() {
        let md = "Intro.\n\n~~~\nlet s = \"```\";\nprice = &#36;5 // we use cookies\n~~~\n\nAfter &#36;5.";
        let out = clean_markdown(md);
        assert!(out.contains("price = &#36;5 // we use cookies"), "got: {out}");
        assert!(out.ends_with("After $5."), "got: {out}");
    }

    #[test]
    fn test_fenced_whitespace_is_preserved() {
        let md = "```\na\n\n\n\nb  \n```";
        assert_eq!(clean_markdown(md), md);

        let md = "Text.\n\n```py\nx = 1\t\n\n\n\ny = 2\n```\n\n\n\nEnd.   ";
        assert_eq!(clean_markdown(md), "Text.\n\n```py\nx = 1\t\n\n\n\ny = 2\n```\n\nEnd.");
    }

    #[test]
    fn test_longer_fence_needs_matching_close() {
        let md = "````\n```\n&#36;\n````\n\n&#36;";
        assert_eq!(clean_markdown(md), "````\n```\n&#36;\n````\n\n$");
    }

    #[test]
    fn test_quoted_fence_untouched() {
        let md = "> ```\n> &#36;x\n> ```";
        assert_eq!(clean_markdown(md), md);
    }

    #[test]
    fn test_decoded_entities_stay_literal() {
        assert_eq!(clean_markdown("2 &#42; 3 &#42; 4"), "2 \\* 3 \\* 4");
        assert_eq!(clean_markdown("see &#91;1&#93;"), "see \\[1\\]");
        assert_eq!(clean_markdown("&#35; not a heading"), "\\# not a heading");
        assert_eq!(clean_markdown("a\n&#62; not a quote"), "a\n\\> not a quote");
        assert_eq!(clean_markdown("&#49;. not a list"), "1\\. not a list");
        assert_eq!(clean_markdown("12&#46; not a list"), "12\\. not a list");
        assert_eq!(clean_markdown("&#60;b&#62; tag"), "\\<b> tag");
        assert_eq!(clean_markdown("mid &#35; line"), "mid # line");
    }

    #[test]
    fn test_remove_invisible_chars() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}c\u{00AD}d"), "abcd");
    }

    #[test]
    fn test_normal_content_preserved() {
        let text = "## Title\n\nSome **bold** and _italic_ content.\n\n- Item one\n- Item two";
        assert_eq!(clean_markdown(text), text);
    }
}
