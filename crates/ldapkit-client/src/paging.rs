//! Simple paged results (RFC 2696).

use std::sync::Arc;

use bytes::Bytes;
use ldap_protocol::control::oid;
use ldap_protocol::{Control, PagedResultsControl};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::request::SearchRequest;
use crate::response::SearchResult;

/// Pages through a search with the paged results control.
///
/// The server ties the cookie to the connection, so every page of one
/// search must go through the same [`Connection`].
#[derive(Debug, Clone)]
pub struct PagedResultsClient {
    page_size: i32,
    critical: bool,
    cookie: Option<Bytes>,
}

impl PagedResultsClient {
    /// Create a client requesting `page_size` entries per page.
    pub fn new(page_size: i32) -> Self {
        Self {
            page_size,
            critical: false,
            cookie: None,
        }
    }

    /// Mark the paged results control critical.
    #[must_use]
    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Whether the last page said more results follow.
    pub fn has_more(&self) -> bool {
        self.cookie.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Fetch the first page of `request`.
    pub async fn execute(
        &mut self,
        conn: &mut Connection,
        request: &SearchRequest,
    ) -> Result<SearchResult> {
        self.cookie = None;
        self.fetch(conn, request).await
    }

    /// Fetch the page after the last one returned.
    pub async fn execute_next(
        &mut self,
        conn: &mut Connection,
        request: &SearchRequest,
    ) -> Result<SearchResult> {
        if !self.has_more() {
            return Err(Error::InvalidRequest("no further pages".into()));
        }
        self.fetch(conn, request).await
    }

    /// Fetch every page and merge them into one result.
    pub async fn execute_to_completion(
        &mut self,
        conn: &mut Connection,
        request: &SearchRequest,
    ) -> Result<SearchResult> {
        let mut result = self.execute(conn, request).await?;
        let mut pages = 1usize;
        while self.has_more() {
            result.merge(self.fetch(conn, request).await?);
            pages += 1;
        }
        tracing::debug!(pages = pages, entries = result.len(), "paged search complete");
        Ok(result)
    }

    async fn fetch(&mut self, conn: &mut Connection, request: &SearchRequest) -> Result<SearchResult> {
        let mut control = PagedResultsControl::new(self.page_size).with_critical(self.critical);
        if let Some(cookie) = &self.cookie {
            control = control.with_cookie(cookie.clone());
        }

        let mut controls: Vec<Arc<dyn Control>> = request
            .controls
            .iter()
            .filter(|c| c.oid() != oid::PAGED_RESULTS)
            .cloned()
            .collect();
        controls.push(Arc::new(control));
        let page_request = request.clone().controls(controls);

        let result = conn.search(&page_request).await?;
        self.cookie = result
            .control::<PagedResultsControl>()
            .and_then(|c| c.cookie.clone());
        tracing::trace!(
            entries = result.len(),
            more = self.has_more(),
            "received page"
        );
        Ok(result)
    }
}
