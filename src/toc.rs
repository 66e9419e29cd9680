use std::collections::BTreeMap;

/// Estimated TOC density used to size the TOC section before it is laid out.
pub const ENTRIES_PER_PAGE: usize = 40;

/// Records the physical page on which each post's marker was committed.
///
/// Filled during the discovery pass, then read while building TOC entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageTracker {
    pages: BTreeMap<usize, usize>,
}

impl PageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// First commit wins: a marker re-emitted after a split keeps its page.
    pub fn record(&mut self, index: usize, page_number: usize) {
        self.pages.entry(index).or_insert(page_number);
    }

    pub fn page_of(&self, index: usize) -> Option<usize> {
        self.pages.get(&index).copied()
    }
}

/// Number of pages the TOC section is assumed to occupy.
///
/// Always at least one, even for an empty book. Not re-measured after the
/// final layout.
pub fn toc_page_offset(entry_count: usize) -> usize {
    entry_count.div_ceil(ENTRIES_PER_PAGE).max(1)
}

/// Page number shown in the TOC for a post whose discovery-pass page is known.
pub fn display_page(tracker: &PageTracker, index: usize, entry_count: usize) -> Option<usize> {
    tracker
        .page_of(index)
        .map(|page| page + toc_page_offset(entry_count))
}
