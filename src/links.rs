use crate::models::{AdjacencyRecord, LinkMention};
use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::{FxBuildHasher, FxHashMap};

/// Concurrent group-by of link mentions on their source title.
///
/// Producers on any thread push mentions; `finish` emits exactly one record per source.
/// Target order inside a record follows arrival order, which is not stable across
/// parallel producers, but the multiset of targets is preserved exactly.
pub struct LinkAggregator {
    adjacency: DashMap<String, Vec<String>, FxBuildHasher>,
}

impl LinkAggregator {
    pub fn new() -> Self {
        Self {
            adjacency: DashMap::with_hasher(FxBuildHasher),
        }
    }

    pub fn add(&self, mention: LinkMention) {
        self.adjacency
            .entry(mention.source)
            .or_default()
            .push(mention.target);
    }

    /// Appends a batch of targets for one source under a single shard lock.
    pub fn add_targets(&self, source: String, targets: Vec<String>) {
        if targets.is_empty() {
            return;
        }
        self.adjacency.entry(source).or_default().extend(targets);
    }

    /// Merges a worker-local grouping, one lock per source.
    pub fn merge(&self, local: FxHashMap<String, Vec<String>>) {
        for (source, targets) in local {
            self.add_targets(source, targets);
        }
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Drains the grouping into records sorted by title.
    pub fn finish(self) -> Vec<AdjacencyRecord> {
        let mut records: Vec<AdjacencyRecord> = self
            .adjacency
            .into_iter()
            .map(|(title, targets)| AdjacencyRecord::new(title, targets))
            .collect();
        records.par_sort_unstable_by(|a, b| a.title.cmp(&b.title));
        records
    }
}

impl Default for LinkAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Groups mentions from a parallel source into adjacency records.
pub fn aggregate<I>(mentions: I) -> Vec<AdjacencyRecord>
where
    I: IntoParallelIterator<Item = LinkMention>,
{
    let aggregator = LinkAggregator::new();
    mentions
        .into_par_iter()
        .for_each(|mention| aggregator.add(mention));
    aggregator.finish()
}
