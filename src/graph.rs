//! Loading the emitted record files into a graph backend.
//!
//! Backends see nothing of the pipeline: vertices come from the score file, edges from the
//! adjacency file, both read through [`crate::records`]. Every edge endpoint becomes a
//! vertex, including sources that received no inbound link and therefore have no score.

use crate::config;
use crate::records;
use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use neo4rs::{query, Graph, Query};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const CYPHER_TITLE_CONSTRAINT: &str =
    "CREATE CONSTRAINT page_title_unique IF NOT EXISTS FOR (p:Page) REQUIRE p.title IS UNIQUE;";

const CYPHER_MERGE_SCORED_PAGES: &str = r#"UNWIND range(0, size($titles) - 1) AS i
MERGE (p:Page {title: $titles[i]})
SET p.score = $scores[i];"#;

const CYPHER_MERGE_PAGES: &str = r#"UNWIND $titles AS title
MERGE (:Page {title: title});"#;

const CYPHER_MERGE_LINKS: &str = r#"UNWIND range(0, size($sources) - 1) AS i
MATCH (a:Page {title: $sources[i]}), (b:Page {title: $targets[i]})
MERGE (a)-[:LINKS_TO]->(b);"#;

/// Capability set every graph backend provides.
#[allow(async_fn_in_trait)]
pub trait GraphLoader {
    fn name(&self) -> &'static str;

    async fn connect(&mut self) -> Result<()>;

    /// Loads one vertex per line of a score file; returns the vertex count.
    async fn load_vertices(&mut self, pages: &Path) -> Result<u64>;

    /// Loads one deduplicated `LINKS_TO` edge per distinct pair of an adjacency file.
    async fn load_edges(&mut self, links: &Path) -> Result<u64>;

    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub vertices: u64,
    pub edges: u64,
}

/// Connects, loads vertices then edges, and always closes a connected backend.
pub async fn load_graph<L: GraphLoader>(
    loader: &mut L,
    pages: &Path,
    links: &Path,
) -> Result<LoadSummary> {
    info!(backend = loader.name(), "Connecting to graph backend");
    loader.connect().await?;

    let loaded = load_files(loader, pages, links).await;

    info!(backend = loader.name(), "Disconnecting from graph backend");
    let closed = loader.close().await;

    let summary = loaded?;
    closed?;
    Ok(summary)
}

async fn load_files<L: GraphLoader>(
    loader: &mut L,
    pages: &Path,
    links: &Path,
) -> Result<LoadSummary> {
    info!(path = ?pages, "Loading page vertices");
    let vertices = loader.load_vertices(pages).await?;
    info!(path = ?links, "Loading link edges");
    let edges = loader.load_edges(links).await?;
    Ok(LoadSummary { vertices, edges })
}

/// Distinct `(source, target)` pairs in first-seen order.
fn distinct_edges(links: &Path) -> Result<Vec<(String, String)>> {
    let adjacency = records::read_adjacency_file(links)?;
    let mut seen = FxHashSet::default();
    let mut edges = Vec::new();
    for record in adjacency {
        for target in record.targets {
            let pair = (record.title.clone(), target);
            if seen.insert(pair.clone()) {
                edges.push(pair);
            }
        }
    }
    Ok(edges)
}

fn endpoint_titles(edges: &[(String, String)]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    edges
        .iter()
        .flat_map(|(a, b)| [a, b])
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

/// In-process backend, useful for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    connected: bool,
    vertices: FxHashMap<String, Option<f32>>,
    edges: FxHashSet<(String, String)>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// `Some(None)` for a vertex without a score.
    pub fn score(&self, title: &str) -> Option<Option<f32>> {
        self.vertices.get(title).copied()
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .contains(&(source.to_string(), target.to_string()))
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected {
            bail!("Memory graph is not connected");
        }
        Ok(())
    }
}

impl GraphLoader for MemoryGraph {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            warn!("Memory graph already connected");
        }
        self.connected = true;
        Ok(())
    }

    async fn load_vertices(&mut self, pages: &Path) -> Result<u64> {
        self.ensure_connected()?;
        let scores = records::read_scores_file(pages)?;
        let count = scores.len() as u64;
        for record in scores {
            self.vertices.insert(record.title, Some(record.score));
        }
        debug!(vertices = count, "Loaded page vertices");
        Ok(count)
    }

    async fn load_edges(&mut self, links: &Path) -> Result<u64> {
        self.ensure_connected()?;
        let edges = distinct_edges(links)?;
        for title in endpoint_titles(&edges) {
            self.vertices.entry(title).or_insert(None);
        }
        let count = edges.len() as u64;
        self.edges.extend(edges);
        debug!(edges = count, "Loaded link edges");
        Ok(count)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.connected {
            warn!("Memory graph not connected, nothing to close");
        }
        self.connected = false;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub bolt_uri: String,
    pub user: String,
    pub password: String,
    pub batch_size: usize,
    pub max_parallel: usize,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            bolt_uri: config::DEFAULT_BOLT_URI.to_string(),
            user: config::DEFAULT_NEO4J_USER.to_string(),
            password: String::new(),
            batch_size: config::GRAPH_BATCH_SIZE,
            max_parallel: config::GRAPH_MAX_PARALLEL,
        }
    }
}

pub struct Neo4jLoader {
    config: Neo4jConfig,
    graph: Option<Graph>,
}

impl Neo4jLoader {
    pub fn new(config: Neo4jConfig) -> Self {
        Self {
            config,
            graph: None,
        }
    }

    fn graph(&self) -> Result<&Graph> {
        self.graph
            .as_ref()
            .context("Not connected to Neo4j; call connect first")
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }
}

impl GraphLoader for Neo4jLoader {
    fn name(&self) -> &'static str {
        "neo4j"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.graph.is_some() {
            warn!(uri = %self.config.bolt_uri, "Neo4j connection already open");
            return Ok(());
        }
        let graph = connect_with_retry(&self.config).await?;
        run_cypher(&graph, CYPHER_TITLE_CONSTRAINT).await?;
        self.graph = Some(graph);
        Ok(())
    }

    async fn load_vertices(&mut self, pages: &Path) -> Result<u64> {
        let graph = self.graph()?;
        let scores = records::read_scores_file(pages)?;

        let queries: Vec<Query> = scores
            .chunks(self.batch_size())
            .map(|batch| {
                let titles: Vec<String> = batch.iter().map(|r| r.title.clone()).collect();
                let values: Vec<f64> = batch.iter().map(|r| f64::from(r.score)).collect();
                query(CYPHER_MERGE_SCORED_PAGES)
                    .param("titles", titles)
                    .param("scores", values)
            })
            .collect();

        run_batches(graph, queries, "Pages", self.config.max_parallel).await?;
        Ok(scores.len() as u64)
    }

    async fn load_edges(&mut self, links: &Path) -> Result<u64> {
        let graph = self.graph()?;
        let edges = distinct_edges(links)?;
        let batch_size = self.batch_size();

        // Endpoints first so the edge batches only MATCH; batches never share a pair.
        let endpoints = endpoint_titles(&edges);
        let vertex_queries: Vec<Query> = endpoints
            .chunks(batch_size)
            .map(|batch| query(CYPHER_MERGE_PAGES).param("titles", batch.to_vec()))
            .collect();
        run_batches(graph, vertex_queries, "Endpoints", self.config.max_parallel).await?;

        let edge_queries: Vec<Query> = edges
            .chunks(batch_size)
            .map(|batch| {
                let sources: Vec<String> = batch.iter().map(|(s, _)| s.clone()).collect();
                let targets: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
                query(CYPHER_MERGE_LINKS)
                    .param("sources", sources)
                    .param("targets", targets)
            })
            .collect();
        run_batches(graph, edge_queries, "Links", self.config.max_parallel).await?;

        Ok(edges.len() as u64)
    }

    async fn close(&mut self) -> Result<()> {
        match self.graph.take() {
            Some(_) => info!("Closing Neo4j connection"),
            None => warn!("Neo4j connection not open, cannot close"),
        }
        Ok(())
    }
}

/// Polymorphic backend selected at runtime.
pub enum GraphBackend {
    Neo4j(Neo4jLoader),
    Memory(MemoryGraph),
}

impl GraphLoader for GraphBackend {
    fn name(&self) -> &'static str {
        match self {
            GraphBackend::Neo4j(l) => l.name(),
            GraphBackend::Memory(l) => l.name(),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        match self {
            GraphBackend::Neo4j(l) => l.connect().await,
            GraphBackend::Memory(l) => l.connect().await,
        }
    }

    async fn load_vertices(&mut self, pages: &Path) -> Result<u64> {
        match self {
            GraphBackend::Neo4j(l) => l.load_vertices(pages).await,
            GraphBackend::Memory(l) => l.load_vertices(pages).await,
        }
    }

    async fn load_edges(&mut self, links: &Path) -> Result<u64> {
        match self {
            GraphBackend::Neo4j(l) => l.load_edges(links).await,
            GraphBackend::Memory(l) => l.load_edges(links).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            GraphBackend::Neo4j(l) => l.close().await,
            GraphBackend::Memory(l) => l.close().await,
        }
    }
}

async fn connect_with_retry(config: &Neo4jConfig) -> Result<Graph> {
    let max_retries = config::GRAPH_MAX_RETRIES;
    let delay = Duration::from_secs(config::GRAPH_RETRY_DELAY_SECS);

    for attempt in 1..=max_retries {
        match Graph::new(&config.bolt_uri, &config.user, &config.password) {
            Ok(graph) => match graph.run(query("RETURN 1;")).await {
                Ok(_) => return Ok(graph),
                Err(e) if attempt < max_retries => {
                    info!(attempt, "Connection test failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e).context(format!(
                        "Cannot connect to Neo4j at {} after {max_retries} attempts",
                        config.bolt_uri
                    ));
                }
            },
            Err(_) if attempt < max_retries => {
                info!(
                    attempt,
                    "Cannot connect to Neo4j at {}, retrying...", config.bolt_uri
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(e).context(format!(
                    "Cannot connect to Neo4j at {} after {max_retries} attempts",
                    config.bolt_uri
                ));
            }
        }
    }

    bail!(
        "Cannot connect to Neo4j at {} after {max_retries} attempts",
        config.bolt_uri
    );
}

async fn run_cypher(graph: &Graph, cypher: &str) -> Result<()> {
    graph
        .run(query(cypher))
        .await
        .with_context(|| format!("Failed to execute: {cypher}"))?;
    Ok(())
}

/// Runs batch queries with at most `max_parallel` in flight.
async fn run_batches(
    graph: &Graph,
    queries: Vec<Query>,
    label: &str,
    max_parallel: usize,
) -> Result<()> {
    let total = queries.len();
    let pb = make_progress_bar(total as u64, label);
    if total == 0 {
        pb.finish_with_message(format!("{label}: nothing to load"));
        return Ok(());
    }

    let mut in_flight = FuturesUnordered::new();
    let mut pending = queries.into_iter().enumerate();
    let mut failed = 0u64;

    let spawn = |batch: usize, q: Query| {
        let graph = graph.clone();
        tokio::spawn(async move { (batch, graph.run(q).await) })
    };

    for (batch, q) in pending.by_ref().take(max_parallel.max(1)) {
        in_flight.push(spawn(batch, q));
    }

    while let Some(joined) = in_flight.next().await {
        let (batch, result) = joined.context("Task join error")?;
        if let Err(e) = result {
            failed += 1;
            warn!(batch, label, error = %e, "Batch load failed");
        }
        pb.inc(1);

        if let Some((batch, q)) = pending.next() {
            in_flight.push(spawn(batch, q));
        }
    }

    pb.finish_with_message(format!("{label}: {} loaded, {failed} failed", total as u64 - failed));

    if failed > 0 {
        bail!("{failed} of {total} {label} batches failed");
    }
    Ok(())
}

fn make_progress_bar(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "    {{spinner:.cyan}} {label:<10} [{{bar:30.cyan/blue}}] {{pos}}/{{len}} batches"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_files(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        let pages = dir.path().join("pages.tsv");
        let links = dir.path().join("links.tsv");
        fs::write(&pages, "Page 2\t1.425\nPage 3\t1.425\n").unwrap();
        fs::write(&links, "Page1\tPage 2,Page 3,Page 2\n").unwrap();
        (pages, links)
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn memory_backend_loads_vertices_and_deduplicated_edges() {
        let dir = TempDir::new().unwrap();
        let (pages, links) = write_files(&dir);

        let mut graph = MemoryGraph::new();
        let summary = block_on(load_graph(&mut graph, &pages, &links)).unwrap();

        assert_eq!(summary, LoadSummary { vertices: 2, edges: 2 });
        assert_eq!(graph.vertex_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.has_edge("Page1", "Page 2"));
        assert!(graph.has_edge("Page1", "Page 3"));
        assert_eq!(graph.score("Page 2"), Some(Some(1.425)));
        assert_eq!(graph.score("Page1"), Some(None));
    }

    #[test]
    fn memory_backend_requires_connect() {
        let dir = TempDir::new().unwrap();
        let (pages, _) = write_files(&dir);

        let mut graph = MemoryGraph::new();
        assert!(block_on(graph.load_vertices(&pages)).is_err());
    }

    #[test]
    fn load_graph_closes_after_failure() {
        let dir = TempDir::new().unwrap();
        let (pages, _) = write_files(&dir);
        let missing = dir.path().join("missing.tsv");

        let mut backend = GraphBackend::Memory(MemoryGraph::new());
        assert!(block_on(load_graph(&mut backend, &pages, &missing)).is_err());

        let GraphBackend::Memory(graph) = &backend else {
            panic!("expected memory backend");
        };
        assert!(!graph.connected);
        assert_eq!(graph.vertex_count(), 2);
    }

    #[test]
    fn neo4j_loader_refuses_to_load_before_connect() {
        let dir = TempDir::new().unwrap();
        let (pages, _) = write_files(&dir);

        let mut loader = Neo4jLoader::new(Neo4jConfig::default());
        let err = block_on(loader.load_vertices(&pages)).unwrap_err();
        assert!(err.to_string().contains("Not connected"));
    }

    #[test]
    fn endpoints_are_distinct_in_first_seen_order() {
        let edges = vec![
            ("A".to_string(), "B".to_string()),
            ("B".to_string(), "C".to_string()),
            ("A".to_string(), "C".to_string()),
        ];
        assert_eq!(endpoint_titles(&edges), vec!["A", "B", "C"]);
    }

    #[test]
    fn cypher_templates_use_parameters() {
        assert!(CYPHER_MERGE_SCORED_PAGES.contains("$titles"));
        assert!(CYPHER_MERGE_SCORED_PAGES.contains("$scores"));
        assert!(CYPHER_MERGE_LINKS.contains("MERGE (a)-[:LINKS_TO]->(b)"));
        assert!(CYPHER_MERGE_PAGES.contains("UNWIND $titles"));
    }

    #[test]
    fn backend_names() {
        assert_eq!(GraphBackend::Memory(MemoryGraph::new()).name(), "memory");
        assert_eq!(
            GraphBackend::Neo4j(Neo4jLoader::new(Neo4jConfig::default())).name(),
            "neo4j"
        );
    }
}
