pub(crate) const DEFAULT_PAGE_SIZE: i64 = 20;
pub(crate) const MAX_PAGE_SIZE: i64 = 100;
// Keeps page * page_size well inside i64 for any accepted query value.
pub(crate) const MAX_PAGE: i64 = 1_000_000;

/// Page-based pagination with clamped bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pagination {
    pub(crate) page: i64,
    pub(crate) page_size: i64,
}

impl Pagination {
    pub(crate) fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.filter(|value| *value >= 1).unwrap_or(1).min(MAX_PAGE);
        let page_size = match page_size {
            Some(value) if value >= 1 => value.min(MAX_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        };
        Self { page, page_size }
    }

    pub(crate) fn limit(&self) -> i64 {
        self.page_size
    }

    pub(crate) fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub(crate) fn total_pages(&self, total: i64) -> i64 {
        if total == 0 {
            0
        } else {
            (total + self.page_size - 1) / self.page_size
        }
    }
}
