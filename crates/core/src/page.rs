//! Pagination primitives for listings.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Pagination parameters (offset based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of items to return.
    pub limit: u32,
    /// Offset of the first item (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    /// 1-based page number and page size, as exposed by listing endpoints.
    pub fn page(current: u32, size: u32) -> Self {
        let limit = size.clamp(1, MAX_PAGE_SIZE);
        Self {
            limit,
            offset: current.saturating_sub(1).saturating_mul(limit),
        }
    }

    pub fn start(&self) -> usize {
        self.offset as usize
    }

    pub fn end(&self) -> usize {
        self.start().saturating_add(self.limit as usize)
    }

    /// Same window, one item larger; used to detect a following slice.
    pub fn look_ahead(&self) -> Self {
        Self {
            limit: self.limit.saturating_add(1),
            offset: self.offset,
        }
    }
}

/// One page of results together with the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > pagination.offset as u64 + pagination.limit as u64;
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            pagination: self.pagination,
            has_more: self.has_more,
        }
    }
}

/// One page of results without a total count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
    pub has_next: bool,
}

impl<T> Slice<T> {
    /// Build from a result fetched with [`Pagination::look_ahead`].
    pub fn from_look_ahead(mut items: Vec<T>, pagination: Pagination) -> Self {
        let has_next = items.len() > pagination.limit as usize;
        items.truncate(pagination.limit as usize);
        Self {
            items,
            pagination,
            has_next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_numbers_are_one_based() {
        let p = Pagination::page(3, 20);
        assert_eq!(p.offset, 40);
        assert_eq!(p.limit, 20);
        assert_eq!(Pagination::page(0, 20).offset, 0);
    }

    #[test]
    fn limit_is_capped() {
        assert_eq!(Pagination::new(Some(5000), None).limit, MAX_PAGE_SIZE);
        assert_eq!(Pagination::new(Some(0), None).limit, 1);
    }

    #[test]
    fn page_reports_more_results() {
        let page = Page::new(vec![1, 2], 5, Pagination::new(Some(2), Some(0)));
        assert!(page.has_more);
        let last = Page::new(vec![5], 5, Pagination::new(Some(2), Some(4)));
        assert!(!last.has_more);
    }

    #[test]
    fn slice_trims_look_ahead_item() {
        let window = Pagination::new(Some(2), None);
        let slice = Slice::from_look_ahead(vec![1, 2, 3], window);
        assert_eq!(slice.items, vec![1, 2]);
        assert!(slice.has_next);

        let tail = Slice::from_look_ahead(vec![1], window);
        assert!(!tail.has_next);
    }
}
