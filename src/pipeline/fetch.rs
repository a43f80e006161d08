//! The fetch contract shared by both backends.
//!
//! [`FetchBackend`] is a tagged variant chosen per request by route. Neither
//! backend keeps per-request state, so one instance of each serves every
//! concurrent request, and each call can be timed out or cancelled on its
//! own.

use super::guard::ValidatedUrl;
use super::http::HttpFetcher;
use super::render::RenderedFetcher;
use crate::error::Web2MdError;
use crate::output::FetchResult;
use crate::ratelimit::Route;
use crate::request::FetchOptions;
use tracing::debug;

/// A borrowed fetch backend.
#[derive(Clone, Copy)]
pub enum FetchBackend<'a> {
    Static(&'a HttpFetcher),
    Rendered(&'a RenderedFetcher),
}

impl FetchBackend<'_> {
    pub fn route(&self) -> Route {
        match self {
            FetchBackend::Static(_) => Route::Static,
            FetchBackend::Rendered(_) => Route::Rendered,
        }
    }

    /// Fetch an already-validated URL.
    pub async fn fetch(&self, target: &ValidatedUrl, opts: &FetchOptions) -> Result<FetchResult, Web2MdError> {
        match self {
            FetchBackend::Static(http) => {
                if opts.wait_for_selector.is_some() || !opts.wait().is_zero() {
                    debug!(url = %target.url, "wait options ignored on the static route");
                }
                http.fetch(target).await
            }
            FetchBackend::Rendered(renderer) => renderer.fetch(target, opts).await,
        }
    }
}
