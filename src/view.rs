//! Local filtering and pagination over a reconciled result set.

use std::sync::Arc;

use crate::reconcile::ReconciledResult;

/// Fixed page size of the results table.
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// A windowed, filterable view over reconciled results.
///
/// Pages are 1-based. Toggling the mismatch filter always resets the view to
/// page 1.
pub struct ResultView {
    rows: Arc<Vec<ReconciledResult>>,
    only_mismatches: bool,
    page: usize,
    page_size: usize,
}

impl ResultView {
    pub fn new(rows: Arc<Vec<ReconciledResult>>) -> Self {
        Self {
            rows,
            only_mismatches: false,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Overrides the page size. Sizes below 1 are treated as 1.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Enables or disables the mismatch-only filter and resets to page 1.
    pub fn set_only_mismatches(&mut self, on: bool) {
        self.only_mismatches = on;
        self.page = 1;
    }

    pub fn only_mismatches(&self) -> bool {
        self.only_mismatches
    }

    /// Replaces the underlying rows (e.g. after a correction-triggered
    /// re-reconcile) and resets to page 1.
    pub fn set_rows(&mut self, rows: Arc<Vec<ReconciledResult>>) {
        self.rows = rows;
        self.page = 1;
    }

    fn filtered(&self) -> impl Iterator<Item = &ReconciledResult> + '_ {
        self.rows
            .iter()
            .filter(move |row| !self.only_mismatches || row.is_mismatch())
    }

    /// Number of rows passing the current filter.
    pub fn filtered_count(&self) -> usize {
        self.filtered().count()
    }

    /// Total pages: at least 1, even for an empty filtered set.
    pub fn page_count(&self) -> usize {
        self.filtered_count().div_ceil(self.page_size).max(1)
    }

    pub fn page(&self) -> usize {
        self.page
    }

    /// Moves to the given page, clamped to `1..=page_count`.
    pub fn set_page(&mut self, page: usize) {
        self.page = page.clamp(1, self.page_count());
    }

    /// The rows visible on the current page, in reconciled order.
    pub fn current_page(&self) -> Vec<&ReconciledResult> {
        let start = (self.page - 1) * self.page_size;
        self.filtered().skip(start).take(self.page_size).collect()
    }
}
