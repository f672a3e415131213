//! Favicon cache collaborator
//!
//! Favicon storage lives outside session sync. The manager only reports
//! which pages were visited or refreshed, and which favicons foreign tabs
//! reference.

use chrono::{DateTime, Utc};
use url::Url;

pub trait FaviconCache: Send + Sync {
    /// A local tab landed on `page_url`
    fn on_favicon_visited(&self, page_url: &Url, favicon_url: Option<&Url>, visit_time: DateTime<Utc>);

    /// The favicon of a page open in a local tab was refreshed
    fn on_page_favicon_updated(&self, page_url: &Url, visit_time: DateTime<Utc>);

    /// A foreign tab referenced `favicon_url` for `page_url`
    fn on_received_sync_favicon(&self, page_url: &Url, favicon_url: &Url, visit_time: DateTime<Utc>);

    /// PNG bytes of a synced favicon for `page_url`, if one is cached
    fn synced_favicon_for_page_url(&self, page_url: &Url) -> Option<Vec<u8>>;
}

/// Favicon cache for hosts that do not sync favicons
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFaviconCache;

impl FaviconCache for NullFaviconCache {
    fn on_favicon_visited(&self, _: &Url, _: Option<&Url>, _: DateTime<Utc>) {}

    fn on_page_favicon_updated(&self, _: &Url, _: DateTime<Utc>) {}

    fn on_received_sync_favicon(&self, _: &Url, _: &Url, _: DateTime<Utc>) {}

    fn synced_favicon_for_page_url(&self, _: &Url) -> Option<Vec<u8>> {
        None
    }
}
