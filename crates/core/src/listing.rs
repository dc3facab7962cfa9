//! Listing normalization: sort allow-list, direction fallback, and
//! pagination clamping.
//!
//! The repository builds SQL from the *normalized* values only, so an
//! unknown sort field or a hostile page size can never reach the query
//! builder.

/// Sort fields accepted by `GET /jobs`. Anything else falls back to
/// [`DEFAULT_SORT_FIELD`].
pub const SORT_FIELDS: &[&str] = &[
    "id",
    "title",
    "status",
    "progress",
    "created_at",
    "started_at",
    "completed_at",
];

pub const DEFAULT_SORT_FIELD: &str = "created_at";

/// Default page size for job listing.
pub const DEFAULT_PER_PAGE: i64 = 10;

/// Maximum page size for job listing.
pub const MAX_PER_PAGE: i64 = 100;

/// Sort direction. Invalid input falls back to descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    /// SQL keyword for this direction.
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Normalized sort: a field from the allow-list plus a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: &'static str,
    pub order: SortOrder,
}

impl Sort {
    pub fn parse(field: Option<&str>, order: Option<&str>) -> Self {
        let field = field
            .and_then(|f| SORT_FIELDS.iter().find(|allowed| **allowed == f))
            .copied()
            .unwrap_or(DEFAULT_SORT_FIELD);
        Self {
            field,
            order: SortOrder::parse(order),
        }
    }
}

/// Normalized pagination: 1-based page number and clamped page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub per_page: i64,
}

impl Page {
    pub fn parse(number: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            number: number.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    /// SQL OFFSET for this page.
    pub fn offset(self) -> i64 {
        (self.number - 1) * self.per_page
    }
}

/// `ceil(total_items / per_page)`. Zero items means zero pages; pages past
/// the end are valid requests that return empty item lists.
pub fn total_pages(total_items: i64, per_page: i64) -> i64 {
    if total_items <= 0 {
        0
    } else {
        (total_items + per_page - 1) / per_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sort_field_falls_back_to_created_at() {
        let sort = Sort::parse(Some("owner_id; DROP TABLE jobs"), Some("asc"));
        assert_eq!(sort.field, "created_at");
        assert_eq!(sort.order, SortOrder::Asc);
    }

    #[test]
    fn known_sort_fields_pass_through() {
        let sort = Sort::parse(Some("progress"), Some("desc"));
        assert_eq!(sort.field, "progress");
        assert_eq!(sort.order, SortOrder::Desc);
    }

    #[test]
    fn invalid_order_falls_back_to_desc() {
        assert_eq!(SortOrder::parse(Some("sideways")), SortOrder::Desc);
        assert_eq!(SortOrder::parse(None), SortOrder::Desc);
        assert_eq!(SortOrder::parse(Some("ASC")), SortOrder::Asc);
    }

    #[test]
    fn page_is_clamped() {
        let page = Page::parse(Some(0), Some(1000));
        assert_eq!(page.number, 1);
        assert_eq!(page.per_page, MAX_PER_PAGE);

        let page = Page::parse(None, Some(0));
        assert_eq!(page.number, 1);
        assert_eq!(page.per_page, 1);

        let page = Page::parse(None, None);
        assert_eq!(page.per_page, DEFAULT_PER_PAGE);
    }

    #[test]
    fn offset_is_zero_based() {
        assert_eq!(Page::parse(Some(1), Some(10)).offset(), 0);
        assert_eq!(Page::parse(Some(4), Some(10)).offset(), 30);
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(25, 10), 3);
        assert_eq!(total_pages(30, 10), 3);
        assert_eq!(total_pages(31, 10), 4);
        assert_eq!(total_pages(0, 10), 0);
    }
}
