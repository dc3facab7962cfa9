//! Shared response envelope types for API handlers.

use mediaforge_core::listing::{total_pages, Page};
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Pagination block attached to list responses.
#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

/// `{ "items": [...], "pagination": {...} }` envelope for `GET /jobs`.
#[derive(Debug, Serialize)]
pub struct PageResponse<T: Serialize> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T: Serialize> PageResponse<T> {
    pub fn new(items: Vec<T>, total_items: i64, page: Page) -> Self {
        Self {
            items,
            pagination: Pagination {
                page: page.number,
                per_page: page.per_page,
                total_items,
                total_pages: total_pages(total_items, page.per_page),
            },
        }
    }
}
