use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics collected across the streaming passes.
///
/// Malformed records and title collisions are recovered locally; these
/// counters are how they stay observable for data-quality review.
#[derive(Default)]
pub struct PipelineStats {
    pub pages_seen: AtomicU64,
    pub pages_skipped: AtomicU64,
    pub redirects_skipped: AtomicU64,
    pub pages_excluded: AtomicU64,
    pub contributors_excluded: AtomicU64,
    pub title_collisions: AtomicU64,
    pub passages_emitted: AtomicU64,
    pub oversize_passages: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pages_seen(&self) {
        self.pages_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pages_skipped(&self) {
        self.pages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_redirects_skipped(&self) {
        self.redirects_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pages_excluded(&self) {
        self.pages_excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_contributors_excluded(&self) {
        self.contributors_excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_title_collisions(&self) {
        self.title_collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_passages(&self, count: u64) {
        self.passages_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_oversize_passages(&self) {
        self.oversize_passages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pages(&self) -> u64 {
        self.pages_seen.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.pages_skipped.load(Ordering::Relaxed)
    }

    pub fn redirects(&self) -> u64 {
        self.redirects_skipped.load(Ordering::Relaxed)
    }

    pub fn excluded(&self) -> u64 {
        self.pages_excluded.load(Ordering::Relaxed)
    }

    pub fn excluded_contributors(&self) -> u64 {
        self.contributors_excluded.load(Ordering::Relaxed)
    }

    pub fn collisions(&self) -> u64 {
        self.title_collisions.load(Ordering::Relaxed)
    }

    pub fn passages(&self) -> u64 {
        self.passages_emitted.load(Ordering::Relaxed)
    }

    pub fn oversize(&self) -> u64 {
        self.oversize_passages.load(Ordering::Relaxed)
    }
}
