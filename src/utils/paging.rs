//! Pagination of large snapshots into independently decodable packets.
//!
//! UDP never reassembles, so a sender that must publish more items than fit
//! in one datagram splits them into pages, each carrying its own index and
//! the page count. Receivers apply pages independently (last write wins).

use std::ops::Range;

/// A page of a larger item sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Zero-based page index
    pub index: usize,
    /// Total number of pages in the snapshot
    pub count: usize,
    /// Item range covered by this page
    pub items: Range<usize>,
}

/// Splits `total` items into pages of at most `page_size` items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    total: usize,
    page_size: usize,
}

impl Pagination {
    /// Create a pagination with a fixed page size (clamped to at least 1)
    pub fn new(total: usize, page_size: usize) -> Self {
        Self {
            total,
            page_size: page_size.max(1),
        }
    }

    /// Size pages so that each packet stays within `max_packet_size`.
    ///
    /// `overhead` covers the header and the fixed fields of the page message,
    /// `item_size` is the (worst case) encoded size of one item.
    pub fn fitting(total: usize, item_size: usize, overhead: usize, max_packet_size: usize) -> Self {
        let room = max_packet_size.saturating_sub(overhead);
        Self::new(total, room / item_size.max(1))
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages; zero items make zero pages
    pub fn page_count(&self) -> usize {
        self.total.div_ceil(self.page_size)
    }

    /// The page at `index`, if any
    pub fn page(&self, index: usize) -> Option<Page> {
        if index >= self.page_count() {
            return None;
        }
        let start = index * self.page_size;
        let end = (start + self.page_size).min(self.total);
        Some(Page {
            index,
            count: self.page_count(),
            items: start..end,
        })
    }

    /// Iterate over all pages in order
    pub fn pages(&self) -> impl Iterator<Item = Page> + '_ {
        (0..self.page_count()).filter_map(move |index| self.page(index))
    }
}
