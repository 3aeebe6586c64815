use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics collected while the pipeline runs
#[derive(Default)]
pub struct PipelineStats {
    pub shards_processed: AtomicU64,
    pub shards_failed: AtomicU64,
    pub records_read: AtomicU64,
    pub documents_parsed: AtomicU64,
    pub pages_skipped: AtomicU64,
    pub links_extracted: AtomicU64,
    pub links_rejected: AtomicU64,
    pub adjacency_records: AtomicU64,
    pub score_records: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_shards(&self) {
        self.shards_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed_shards(&self) {
        self.shards_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records(&self, count: u64) {
        self.records_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_documents(&self, count: u64) {
        self.documents_parsed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, count: u64) {
        self.pages_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_links(&self, count: u64) {
        self.links_extracted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_rejected_links(&self, count: u64) {
        self.links_rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_adjacency_records(&self, count: u64) {
        self.adjacency_records.store(count, Ordering::Relaxed);
    }

    pub fn set_score_records(&self, count: u64) {
        self.score_records.store(count, Ordering::Relaxed);
    }

    pub fn shards(&self) -> u64 {
        self.shards_processed.load(Ordering::Relaxed)
    }

    pub fn failed_shards(&self) -> u64 {
        self.shards_failed.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn documents(&self) -> u64 {
        self.documents_parsed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.pages_skipped.load(Ordering::Relaxed)
    }

    pub fn links(&self) -> u64 {
        self.links_extracted.load(Ordering::Relaxed)
    }

    pub fn rejected_links(&self) -> u64 {
        self.links_rejected.load(Ordering::Relaxed)
    }

    pub fn adjacency(&self) -> u64 {
        self.adjacency_records.load(Ordering::Relaxed)
    }

    pub fn scores(&self) -> u64 {
        self.score_records.load(Ordering::Relaxed)
    }
}

/// Counts one shard worker accumulates before committing them in one go.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShardCounts {
    pub records: u64,
    pub documents: u64,
    pub skipped: u64,
    pub links: u64,
    pub rejected: u64,
}

impl PipelineStats {
    /// Adds a finished shard's counts.
    pub fn commit(&self, counts: &ShardCounts) {
        self.inc_shards();
        self.add_records(counts.records);
        self.add_documents(counts.documents);
        self.add_skipped(counts.skipped);
        self.add_links(counts.links);
        self.add_rejected_links(counts.rejected);
    }
}
