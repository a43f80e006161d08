//! Browser abstraction for the rendered route.
//!
//! [`RenderEngine`] creates rendering contexts; [`RenderContext`] drives one
//! of them through a single page load. The [`pool::BrowserPool`] bounds how
//! many contexts exist at once and hands them out as
//! [`pool::BrowserHandle`]s.
//!
//! The traits keep the pipeline independent of any particular browser:
//! the `chromium` feature provides [`chromium::ChromiumEngine`], and tests
//! use scripted in-memory engines.
//!
//! A browser resolves names and follows redirects on its own, so checking
//! the first URL is not enough. Every navigation carries a [`RequestGate`]
//! that the context must consult for each request before it is sent:
//! the document, every redirect hop and every subresource.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod pool;

use crate::error::Web2MdError;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// Admission check for requests the browser is about to send.
#[async_trait]
pub trait RequestGate: Send + Sync {
    /// `Ok(())` lets the request go out. An error blocks it.
    async fn admit(&self, url: &Url) -> Result<(), Web2MdError>;
}

/// What a top-level navigation reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Navigation {
    /// HTTP status of the main document, when the browser exposed one.
    pub status: Option<u16>,
}

/// A browser that can create isolated rendering contexts.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Create a new context (tab) ready to navigate.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, Web2MdError>;

    /// Shut down the browser. Contexts still alive become unusable.
    async fn shutdown(&self) -> Result<(), Web2MdError> {
        Ok(())
    }
}

/// One rendering context, leased to exactly one request at a time.
///
/// None of these methods apply their own timeout; the rendered backend wraps
/// each call in the bound that applies to it.
#[async_trait]
pub trait RenderContext: Send {
    /// Load `url` and wait for the load event. Every request issued while
    /// loading goes through `gate` first; a refused main document (or one of
    /// its redirect hops) fails the navigation with the gate's error.
    async fn navigate(&mut self, url: &Url, gate: Arc<dyn RequestGate>) -> Result<Navigation, Web2MdError>;

    /// Whether an element matching the CSS `selector` is currently in the DOM.
    async fn has_selector(&mut self, selector: &str) -> Result<bool, Web2MdError>;

    /// Serialised live DOM (`document.documentElement.outerHTML`).
    async fn content(&mut self) -> Result<String, Web2MdError>;

    /// URL the context currently shows, after any client-side navigation.
    async fn current_url(&mut self) -> Result<Option<String>, Web2MdError>;

    /// Clear per-request state (cookies, page) before the context is reused.
    async fn reset(&mut self) -> Result<(), Web2MdError>;

    /// Destroy the context.
    async fn close(self: Box<Self>);
}
