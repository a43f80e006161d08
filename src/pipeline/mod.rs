//! Pipeline stages for web-page-to-Markdown conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and a backend can be swapped without touching the
//! others.
//!
//! ## Data Flow
//!
//! ```text
//! guard ──▶ fetch ──▶ sanitize ──▶ extract ──▶ normalize ──▶ markdown
//! (SSRF)   (http |    (DOM        (scoring)   (absolute    (+ postprocess,
//!           render)    cleanup)                URLs)        word count)
//! ```
//!
//! 1. [`guard`]     validate the URL and resolve it to public addresses only
//! 2. [`fetch`]     dispatch to [`http`] (reqwest) or [`render`] (browser
//!    pool); the only stages that suspend
//! 3. [`sanitize`]  drop scripts, hidden elements and boilerplate from the
//!    parsed tree
//! 4. [`extract`]   title, description, canonical and the main-content
//!    subtree
//! 5. [`normalize`] resolve and deduplicate media and link references
//! 6. [`markdown`]  structural DOM-to-Markdown mapping, then the
//!    [`postprocess`] rules, then the word count
//!
//! [`detect`] classifies the page afterwards (WordPress, SPA shell, SSR).
//! [`boilerplate`] runs across the pages of a crawl, after conversion.

pub mod boilerplate;
pub mod detect;
pub mod extract;
pub mod fetch;
pub mod guard;
pub mod http;
pub mod markdown;
pub mod normalize;
pub mod postprocess;
pub mod render;
pub mod sanitize;
