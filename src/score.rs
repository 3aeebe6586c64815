use crate::config::ScoreConfig;
use crate::models::{AdjacencyRecord, ScoreRecord};
use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::FxBuildHasher;

/// Single-pass inbound-link score.
///
/// Every source is assumed to carry a rank of exactly 1.0, so a target's score is
/// `damping * (1 + sum(1 / d_i)) + (1 - damping)` over the out-degrees `d_i` of the pages
/// linking to it. There is no iteration towards a fixed point.
pub struct ScoreAggregator {
    config: ScoreConfig,
    contributions: DashMap<String, Vec<u32>, FxBuildHasher>,
}

/// Step A: one `(target, out_degree)` pair per edge of the record.
pub fn expand(record: &AdjacencyRecord) -> impl Iterator<Item = (&str, u32)> + '_ {
    let out_degree = record.out_degree() as u32;
    record.targets.iter().map(move |t| (t.as_str(), out_degree))
}

/// Step B: the score of one target from the out-degrees of its linking sources.
pub fn reduce(config: &ScoreConfig, title: String, out_degrees: &[u32]) -> ScoreRecord {
    let mut raw = 1.0f32;
    for &d in out_degrees {
        raw += 1.0 / d as f32;
    }
    ScoreRecord {
        title,
        score: config.damping * raw + (1.0 - config.damping),
    }
}

impl ScoreAggregator {
    pub fn new(config: ScoreConfig) -> Self {
        Self {
            config,
            contributions: DashMap::with_hasher(FxBuildHasher),
        }
    }

    pub fn damping(&self) -> f32 {
        self.config.damping
    }

    /// Records the contributions of one adjacency record.
    pub fn add(&self, record: &AdjacencyRecord) {
        for (target, out_degree) in expand(record) {
            match self.contributions.get_mut(target) {
                Some(mut degrees) => degrees.push(out_degree),
                None => self
                    .contributions
                    .entry(target.to_string())
                    .or_default()
                    .push(out_degree),
            }
        }
    }

    pub fn reduce(&self, title: String, out_degrees: &[u32]) -> ScoreRecord {
        reduce(&self.config, title, out_degrees)
    }

    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// Reduces every target in parallel; output sorted by title.
    pub fn finish(self) -> Vec<ScoreRecord> {
        let ScoreAggregator {
            config,
            contributions,
        } = self;
        let grouped: Vec<(String, Vec<u32>)> = contributions.into_iter().collect();

        let mut scores: Vec<ScoreRecord> = grouped
            .into_par_iter()
            .map(|(title, degrees)| reduce(&config, title, &degrees))
            .collect();
        scores.par_sort_unstable_by(|a, b| a.title.cmp(&b.title));
        scores
    }
}

/// Runs both steps over a full set of adjacency records.
pub fn score_all(records: &[AdjacencyRecord], config: &ScoreConfig) -> Vec<ScoreRecord> {
    let aggregator = ScoreAggregator::new(config.clone());
    records.par_iter().for_each(|record| aggregator.add(record));
    aggregator.finish()
}
