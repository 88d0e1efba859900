//! Marker-based listing
//!
//! [`Paginator`] yields one [`ListPage`] per call. Each fetch is a single
//! idempotent request keyed by the marker, so a listing can be restarted
//! from any key.

use tracing::debug;

use oc_core::{ListEntry, ListPage, ListSummary, Method, ObjectRef, Options, Result, Transport};

use crate::client::{encode_query_value, OssClient, RequestSpec};
use crate::xml::{self, ListBucketResult};

/// Largest page the service returns
pub const MAX_PAGE_SIZE: usize = 1000;

/// Parameters of one listing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<usize>,
}

impl ListParams {
    /// List everything under a prefix, full pages
    pub fn prefix(prefix: &str) -> Self {
        Self {
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            max_keys: Some(MAX_PAGE_SIZE),
            ..Default::default()
        }
    }

    pub fn with_marker(mut self, marker: Option<String>) -> Self {
        self.marker = marker.filter(|m| !m.is_empty());
        self
    }

    /// Encoded query string, parameters in a fixed order
    pub fn query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(delimiter) = &self.delimiter {
            params.push(format!("delimiter={}", encode_query_value(delimiter)));
        }
        if let Some(marker) = &self.marker {
            params.push(format!("marker={}", encode_query_value(marker)));
        }
        if let Some(max_keys) = self.max_keys {
            params.push(format!("max-keys={max_keys}"));
        }
        if let Some(prefix) = &self.prefix {
            params.push(format!("prefix={}", encode_query_value(prefix)));
        }
        params.join("&")
    }
}

impl<T: Transport + 'static> OssClient<T> {
    /// Fetch a single listing page
    pub async fn list_page(&self, bucket: &str, params: &ListParams) -> Result<ListPage> {
        let spec = RequestSpec::new(Method::Get, bucket, "").query(params.query_string());
        let res = self.execute(spec).await?.error_for_status()?;
        let parsed: ListBucketResult = xml::parse(&res.body)?;
        Ok(parsed.into_page(bucket))
    }

    /// Start a paginated listing
    pub fn paginate(&self, bucket: &str, params: ListParams) -> Paginator<'_, T> {
        Paginator::new(self, bucket, params)
    }

    /// List up to `maxkeys` entries (1000 by default) under a prefix
    ///
    /// Honours `marker` and `delimiter`; keeps fetching pages until enough
    /// entries arrived or the listing is exhausted. The returned page is
    /// truncated when more entries remain.
    pub async fn list_objects(&self, target: &ObjectRef, options: &Options) -> Result<ListPage> {
        let limit = options.max_keys.unwrap_or(MAX_PAGE_SIZE).max(1);
        let mut params = ListParams::prefix(&target.key).with_marker(options.marker.clone());
        params.delimiter = options.delimiter.clone();

        let mut merged = ListPage {
            bucket: target.bucket.clone(),
            prefix: target.key.clone(),
            marker: options.marker.clone().unwrap_or_default(),
            delimiter: options.delimiter.clone().unwrap_or_default(),
            max_keys: Some(limit),
            ..Default::default()
        };

        let mut pages = self.paginate(&target.bucket, params);
        loop {
            let remaining = limit - merged.entries.len();
            pages.set_page_size(remaining.min(MAX_PAGE_SIZE));
            let Some(page) = pages.next_page().await? else {
                break;
            };
            merged.is_truncated = page.is_truncated;
            merged.next_marker = page.next_marker().map(str::to_string);
            merged.entries.extend(page.entries);
            for prefix in page.common_prefixes {
                if !merged.common_prefixes.contains(&prefix) {
                    merged.common_prefixes.push(prefix);
                }
            }
            if merged.entries.len() >= limit {
                break;
            }
        }
        Ok(merged)
    }

    /// Walk every object under a prefix, one page at a time
    ///
    /// Sequential and read-only; `visit` sees each entry in listing order.
    pub async fn list_all_objects<F>(
        &self,
        target: &ObjectRef,
        options: &Options,
        mut visit: F,
    ) -> Result<ListSummary>
    where
        F: FnMut(&ListEntry),
    {
        let params = ListParams::prefix(&target.key).with_marker(options.marker.clone());
        let mut pages = self.paginate(&target.bucket, params);
        let mut summary = ListSummary::default();

        while let Some(page) = pages.next_page().await? {
            for entry in &page.entries {
                summary.count += 1;
                summary.total_size += entry.size;
                visit(entry);
            }
        }
        summary.pages = pages.fetched();
        debug!(count = summary.count, pages = summary.pages, "listing complete");
        Ok(summary)
    }
}

/// Lazy sequence of listing pages
pub struct Paginator<'a, T> {
    client: &'a OssClient<T>,
    bucket: String,
    params: ListParams,
    exhausted: bool,
    fetched: u64,
}

impl<'a, T: Transport + 'static> Paginator<'a, T> {
    pub fn new(client: &'a OssClient<T>, bucket: &str, params: ListParams) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            params,
            exhausted: false,
            fetched: 0,
        }
    }

    /// Fetch the next page, or `None` once the listing is exhausted
    ///
    /// A truncated page continues from [`ListPage::next_marker`]; one that
    /// yields no marker ends the listing.
    pub async fn next_page(&mut self) -> Result<Option<ListPage>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self.client.list_page(&self.bucket, &self.params).await?;
        self.fetched += 1;
        debug!(
            bucket = %self.bucket,
            marker = self.params.marker.as_deref().unwrap_or(""),
            entries = page.entries.len(),
            truncated = page.is_truncated,
            "listing page"
        );

        match page.next_marker() {
            Some(marker) => self.params.marker = Some(marker.to_string()),
            None => self.exhausted = true,
        }
        Ok(Some(page))
    }

    /// Marker the next request will carry
    pub fn marker(&self) -> Option<&str> {
        self.params.marker.as_deref()
    }

    /// Listing requests issued so far
    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    pub fn set_page_size(&mut self, size: usize) {
        self.params.max_keys = Some(size.max(1));
    }
}
