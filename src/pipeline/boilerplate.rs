//! Cross-page boilerplate removal for crawl results.
//!
//! Navigation, footers and newsletter boxes that survive sanitization on
//! one page survive on every page of the same site. A block that appears
//! verbatim on most pages of a crawl is removed from all of them.
//!
//! Blocks are the blank-line-separated paragraphs of the Markdown. A fenced
//! code block is one block even when it contains blank lines, so removal
//! never leaves a dangling fence.

use super::postprocess::FenceTracker;
use std::collections::{HashMap, HashSet};

/// Blocks shorter than this (in characters) are never treated as
/// boilerplate. Single words and short headings repeat by coincidence.
pub const MIN_BLOCK_CHARS: usize = 30;

/// Default fraction of pages a block must appear on.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Split Markdown into trimmed, non-empty blocks.
pub fn split_blocks(markdown: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut fences = FenceTracker::default();

    for line in markdown.lines() {
        let in_code = fences.is_code(line);
        if !in_code && line.trim().is_empty() {
            push_block(&mut blocks, &mut current);
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    push_block(&mut blocks, &mut current);
    blocks
}

fn push_block(blocks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        blocks.push(trimmed.to_string());
    }
    current.clear();
}

/// Blocks long enough to be considered, appearing on at least
/// `max(2, floor(pages × threshold))` distinct pages.
pub fn find_boilerplate<S: AsRef<str>>(pages: &[S], threshold: f64) -> HashSet<String> {
    if pages.len() < 2 {
        return HashSet::new();
    }
    let mut counts: HashMap<String, usize> = HashMap::new();
    for page in pages {
        let distinct: HashSet<String> = split_blocks(page.as_ref())
            .into_iter()
            .filter(|b| b.chars().count() >= MIN_BLOCK_CHARS)
            .collect();
        for block in distinct {
            *counts.entry(block).or_default() += 1;
        }
    }

    let min_pages = ((pages.len() as f64 * threshold).floor() as usize).max(2);
    counts
        .into_iter()
        .filter(|(_, n)| *n >= min_pages)
        .map(|(block, _)| block)
        .collect()
}

/// Remove repeated blocks from every page.
///
/// Returns the cleaned pages (same length and order) and whether anything
/// was removed. A page made only of boilerplate keeps its original text.
pub fn remove_boilerplate<S: AsRef<str>>(pages: &[S], threshold: f64) -> (Vec<String>, bool) {
    let boilerplate = find_boilerplate(pages, threshold);
    if boilerplate.is_empty() {
        return (pages.iter().map(|p| p.as_ref().to_string()).collect(), false);
    }

    let cleaned = pages
        .iter()
        .map(|page| {
            let page = page.as_ref();
            let kept: Vec<String> = split_blocks(page)
                .into_iter()
                .filter(|b| !boilerplate.contains(b))
                .collect();
            if kept.is_empty() {
                page.to_string()
            } else {
                kept.join("\n\n")
            }
        })
        .collect();
    (cleaned, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOOTER: &str = "Copyright 2024 Example Company. All rights reserved worldwide.";

    fn pages_with_footer(bodies: &[&str]) -> Vec<String> {
        bodies.iter().map(|b| format!("{b}\n\n{FOOTER}")).collect()
    }

    #[test]
    fn splits_on_blank_lines() {
        let blocks = split_blocks("# Title\n\nFirst paragraph.\n\n\n  Second.  \n");
        assert_eq!(blocks, vec!["# Title", "First paragraph.", "Second."]);
        assert!(split_blocks("").is_empty());
    }

    #[test]
    fn fenced_code_is_one_block() {
        let md = "Intro.\n\n```\nlet a = 1;\n\nlet b = 2;\n```\n\nOutro.";
        let blocks = split_blocks(md);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1], "```\nlet a = 1;\n\nlet b = 2;\n```");
    }

    #[test]
    fn single_page_is_unchanged() {
        let pages = vec![format!("Only page.\n\n{FOOTER}")];
        let (out, removed) = remove_boilerplate(&pages, DEFAULT_THRESHOLD);
        assert!(!removed);
        assert_eq!(out, pages);
    }

    #[test]
    fn repeated_footer_is_removed_everywhere() {
        let pages = pages_with_footer(&[
            "Unique article about machine learning algorithms and applications.",
            "Unique article about web development frameworks and libraries.",
            "Unique article about data science and statistical modelling.",
        ]);
        let (out, removed) = remove_boilerplate(&pages, DEFAULT_THRESHOLD);
        assert!(removed);
        for (page, original) in out.iter().zip(&pages) {
            assert!(!page.contains(FOOTER), "got: {page}");
            assert!(original.starts_with(page.as_str()), "got: {page}");
        }
    }

    #[test]
    fn block_below_threshold_is_kept() {
        let repeated = "This block repeats only on some pages but not most of them.";
        let pages = vec![
            format!("First page unique content, different from all the others.\n\n{repeated}"),
            format!("Second page unique content, different from all the others.\n\n{repeated}"),
            "Third page unique content, different from all the others.".to_string(),
            "Fourth page unique content, different from all the others.".to_string(),
            "Fifth page unique content, different from all the others.".to_string(),
        ];
        // 2 of 5 pages; 0.6 needs 3.
        let (out, removed) = remove_boilerplate(&pages, DEFAULT_THRESHOLD);
        assert!(!removed);
        assert!(out[0].contains(repeated));
    }

    #[test]
    fn short_repeated_blocks_survive() {
        let pages = pages_with_footer(&[
            "Share\n\nA long paragraph about the first subject of this site.",
            "Share\n\nA long paragraph about the second subject of this site.",
        ]);
        let (out, removed) = remove_boilerplate(&pages, DEFAULT_THRESHOLD);
        assert!(removed);
        assert_eq!(out[0], "Share\n\nA long paragraph about the first subject of this site.");
    }

    #[test]
    fn page_of_only_boilerplate_keeps_its_text() {
        let pages = vec![FOOTER.to_string(), FOOTER.to_string()];
        let (out, removed) = remove_boilerplate(&pages, DEFAULT_THRESHOLD);
        assert!(removed);
        assert_eq!(out, pages);
    }

    #[test]
    fn duplicate_block_within_one_page_counts_once() {
        let pages = vec![
            format!("{FOOTER}\n\n{FOOTER}\n\nA long paragraph that only this page has."),
            "Another long paragraph that only this page has.".to_string(),
        ];
        assert!(find_boilerplate(&pages, DEFAULT_THRESHOLD).is_empty());
    }
}
