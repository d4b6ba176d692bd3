//! Page request and response types shared by every provider adapter.

use serde::{Deserialize, Serialize};

/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Request for one page of vendor records.
///
/// `page_token` is opaque to the caller: adapters encode whatever cursor
/// state they need into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum number of records to return.
    pub limit: u32,
    /// Cursor returned by the previous page, `None` for the first page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

impl PageRequest {
    /// First page with the given size.
    #[must_use]
    pub fn first(limit: u32) -> Self {
        Self {
            limit,
            page_token: None,
        }
    }

    /// Continue from a cursor.
    #[must_use]
    pub fn after(limit: u32, page_token: impl Into<String>) -> Self {
        Self {
            limit,
            page_token: Some(page_token.into()),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

/// One page of records plus the cursor for the next one.
///
/// `has_more == false` is the only termination signal; `total_count` is
/// advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl<T> PaginatedResponse<T> {
    /// A final page.
    #[must_use]
    pub fn last(data: Vec<T>) -> Self {
        Self {
            data,
            has_more: false,
            next_page_token: None,
            total_count: None,
        }
    }

    /// A page followed by more data.
    #[must_use]
    pub fn more(data: Vec<T>, next_page_token: impl Into<String>) -> Self {
        Self {
            data,
            has_more: true,
            next_page_token: Some(next_page_token.into()),
            total_count: None,
        }
    }

    /// An empty final page.
    #[must_use]
    pub fn empty() -> Self {
        Self::last(Vec::new())
    }

    /// Attach an advisory total.
    #[must_use]
    pub fn with_total_count(mut self, total: u64) -> Self {
        self.total_count = Some(total);
        self
    }

    /// Convert the records while keeping the cursor.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedResponse<U> {
        PaginatedResponse {
            data: self.data.into_iter().map(f).collect(),
            has_more: self.has_more,
            next_page_token: self.next_page_token,
            total_count: self.total_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_constructors() {
        let first = PageRequest::first(50);
        assert_eq!(first.limit, 50);
        assert!(first.page_token.is_none());

        let next = PageRequest::after(50, "cursor");
        assert_eq!(next.page_token.as_deref(), Some("cursor"));
    }

    #[test]
    fn test_paginated_response_map_keeps_cursor() {
        let page = PaginatedResponse::more(vec![1, 2, 3], "next").with_total_count(10);
        let mapped = page.map(|n| n * 2);
        assert_eq!(mapped.data, vec![2, 4, 6]);
        assert!(mapped.has_more);
        assert_eq!(mapped.next_page_token.as_deref(), Some("next"));
        assert_eq!(mapped.total_count, Some(10));
    }
}
