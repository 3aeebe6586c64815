use crate::config::{PipelineConfig, PROGRESS_INTERVAL};
use crate::links::LinkAggregator;
use crate::models::{AdjacencyRecord, ScoreRecord, Shard};
use crate::parser::DocumentParser;
use crate::reader::{read_shard, ByteSource};
use crate::score;
use crate::stats::{PipelineStats, ShardCounts};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::time::Instant;
use tracing::{debug, error, info};

/// How the input stream is cut into shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardPlan {
    Count(usize),
    SplitSize(u64),
}

/// A shard whose stream failed; none of its mentions reached the aggregation.
#[derive(Debug)]
pub struct ShardFailure {
    pub shard: Shard,
    pub error: anyhow::Error,
}

pub struct LinkStageOutput {
    pub records: Vec<AdjacencyRecord>,
    pub failures: Vec<ShardFailure>,
}

pub struct PipelineOutput {
    pub adjacency: Vec<AdjacencyRecord>,
    pub scores: Vec<ScoreRecord>,
    pub failures: Vec<ShardFailure>,
}

impl PipelineOutput {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn plan_shards<S: ByteSource>(source: &S, plan: ShardPlan) -> Result<Vec<Shard>> {
    let total_len = source.byte_len().context("Failed to determine input length")?;
    let shards = match plan {
        ShardPlan::Count(count) => Shard::partition(total_len, count),
        ShardPlan::SplitSize(size) => Shard::partition_by_size(total_len, size),
    };
    debug!(total_len, shards = shards.len(), "Planned shards");
    Ok(shards)
}

type LocalAdjacency = FxHashMap<String, Vec<String>>;

/// Reads and parses one shard into a worker-local grouping.
fn process_shard<S: ByteSource>(
    source: &S,
    shard: &Shard,
    config: &PipelineConfig,
    parser: &DocumentParser,
) -> Result<(LocalAdjacency, ShardCounts)> {
    let reader = read_shard(source, shard, &config.reader)
        .with_context(|| format!("Failed to open {shard}"))?;

    let mut local = LocalAdjacency::default();
    let mut counts = ShardCounts::default();

    for record in reader {
        let record = record.with_context(|| format!("Stream read failed in {shard}"))?;
        counts.records += 1;
        if counts.records % PROGRESS_INTERVAL == 0 {
            debug!(shard = shard.id, records = counts.records, "Shard progress");
        }

        let doc = match parser.parse(&record) {
            Some(doc) if parser.is_content_page(&doc) => doc,
            _ => {
                counts.skipped += 1;
                continue;
            }
        };
        counts.documents += 1;

        let scan = parser.scan_links(&doc.body);
        counts.links += scan.targets.len() as u64;
        counts.rejected += scan.rejected;
        if !scan.targets.is_empty() {
            local.entry(doc.title).or_default().extend(scan.targets);
        }
    }

    Ok((local, counts))
}

/// Stage 1: shards in parallel, then one group-by on source title.
pub fn run_link_stage<S: ByteSource>(
    source: &S,
    shards: &[Shard],
    config: &PipelineConfig,
    stats: &PipelineStats,
    progress: &ProgressBar,
) -> LinkStageOutput {
    let start = Instant::now();
    let parser = DocumentParser::new(config.parser.clone());
    let aggregator = LinkAggregator::new();

    info!(shards = shards.len(), "Starting link extraction");

    let failures: Vec<ShardFailure> = shards
        .par_iter()
        .filter_map(|shard| {
            let outcome = process_shard(source, shard, config, &parser);
            progress.inc(1);
            match outcome {
                Ok((local, counts)) => {
                    debug!(
                        shard = shard.id,
                        records = counts.records,
                        links = counts.links,
                        "Shard complete"
                    );
                    aggregator.merge(local);
                    stats.commit(&counts);
                    None
                }
                Err(error) => {
                    let message = format!("{error:#}");
                    error!(shard = shard.id, error = %message, "Shard failed");
                    stats.inc_failed_shards();
                    Some(ShardFailure {
                        shard: *shard,
                        error,
                    })
                }
            }
        })
        .collect();

    let records = aggregator.finish();
    stats.set_adjacency_records(records.len() as u64);

    info!(
        sources = records.len(),
        links = stats.links(),
        failed_shards = failures.len(),
        duration_secs = start.elapsed().as_secs_f64(),
        "Link extraction complete"
    );

    LinkStageOutput { records, failures }
}

/// Stage 2: inbound scores from complete adjacency records.
pub fn run_score_stage(
    records: &[AdjacencyRecord],
    config: &PipelineConfig,
    stats: &PipelineStats,
) -> Vec<ScoreRecord> {
    let start = Instant::now();
    info!(sources = records.len(), "Starting scoring");

    let scores = score::score_all(records, &config.scoring);
    stats.set_score_records(scores.len() as u64);

    info!(
        pages = scores.len(),
        duration_secs = start.elapsed().as_secs_f64(),
        "Scoring complete"
    );
    scores
}

/// Runs both stages; stage 2 starts only after every shard of stage 1 has finished.
pub fn run_pipeline<S: ByteSource>(
    source: &S,
    plan: ShardPlan,
    config: &PipelineConfig,
    stats: &PipelineStats,
    progress: &ProgressBar,
) -> Result<PipelineOutput> {
    config.validate()?;
    let shards = plan_shards(source, plan)?;
    progress.set_length(shards.len() as u64);

    let links = run_link_stage(source, &shards, config, stats, progress);
    progress.finish_and_clear();

    let scores = run_score_stage(&links.records, config, stats);

    Ok(PipelineOutput {
        adjacency: links.records,
        scores,
        failures: links.failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemorySource;

    fn dump(pages: &[(&str, &str)]) -> MemorySource {
        let mut xml = String::from("<mediawiki>\n");
        for (title, text) in pages {
            xml.push_str(&format!(
                "  <page>\n    <title>{title}</title>\n    <revision><text xml:space=\"preserve\">{text}</text></revision>\n  </page>\n"
            ));
        }
        xml.push_str("</mediawiki>\n");
        MemorySource::new(xml.into_bytes())
    }

    fn run(source: &MemorySource, plan: ShardPlan) -> PipelineOutput {
        run_pipeline(
            source,
            plan,
            &PipelineConfig::default(),
            &PipelineStats::new(),
            &ProgressBar::hidden(),
        )
        .unwrap()
    }

    #[test]
    fn sample_page_end_to_end() {
        let source = dump(&[("Page 1", "[[Page 2]] [[Page 2]] [[Page 3]]")]);
        let output = run(&source, ShardPlan::Count(1));

        assert!(output.is_complete());
        assert_eq!(output.adjacency.len(), 1);
        assert_eq!(output.adjacency[0].title, "Page 1");
        assert_eq!(output.adjacency[0].out_degree(), 3);

        let titles: Vec<&str> = output.scores.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Page 2", "Page 3"]);
        let expected_page_2 = 0.85 * (1.0 + 2.0 / 3.0) + 0.15;
        assert!((output.scores[0].score - expected_page_2).abs() < 1e-5);
    }

    #[test]
    fn namespace_pages_are_not_sources() {
        let source = dump(&[("Category:Things", "[[A]]"), ("Real", "[[B]]")]);
        let output = run(&source, ShardPlan::Count(2));
        let sources: Vec<&str> = output.adjacency.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(sources, vec!["Real"]);
    }

    #[test]
    fn pages_without_links_have_no_adjacency() {
        let source = dump(&[("Quiet", "no links at all"), ("Loud", "[[Quiet]]")]);
        let output = run(&source, ShardPlan::Count(3));
        assert_eq!(output.adjacency.len(), 1);
        assert_eq!(output.adjacency[0].title, "Loud");
        assert_eq!(output.scores.len(), 1);
        assert_eq!(output.scores[0].title, "Quiet");
    }

    #[test]
    fn stats_track_each_stage() {
        let source = dump(&[
            ("A", "[[B]] [[Category:X]]"),
            ("File:Pic.png", "[[A]]"),
            ("B", "[[A]]"),
        ]);
        let stats = PipelineStats::new();
        let output = run_pipeline(
            &source,
            ShardPlan::Count(2),
            &PipelineConfig::default(),
            &stats,
            &ProgressBar::hidden(),
        )
        .unwrap();

        assert_eq!(stats.shards(), 2);
        assert_eq!(stats.records(), 3);
        assert_eq!(stats.documents(), 2);
        assert_eq!(stats.skipped(), 1);
        assert_eq!(stats.links(), 2);
        assert_eq!(stats.rejected_links(), 1);
        assert_eq!(stats.adjacency(), output.adjacency.len() as u64);
        assert_eq!(stats.scores(), output.scores.len() as u64);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PipelineConfig {
            shards: 0,
            ..PipelineConfig::default()
        };
        let result = run_pipeline(
            &dump(&[]),
            ShardPlan::Count(1),
            &config,
            &PipelineStats::new(),
            &ProgressBar::hidden(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn plan_by_split_size() {
        let source = MemorySource::new(vec![0u8; 25]);
        let shards = plan_shards(&source, ShardPlan::SplitSize(10)).unwrap();
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[2], Shard::new(2, 20, 25));
    }
}
