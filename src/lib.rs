//! Linkrank: Wikipedia link-graph extraction and inbound-link scoring
//!
//! The pipeline turns a raw Wikipedia XML dump into two plain-text record files:
//!
//! 1. **Link stage** -- The dump is cut into byte-range shards. Each shard is scanned
//!    independently for `<page>...</page>` records; a record that starts inside a shard
//!    belongs to it even when it ends in the next one. Records are parsed into documents,
//!    bracketed wiki links are extracted, and the mentions are grouped by source title
//!    into adjacency records.
//! 2. **Score stage** -- Every adjacency record spreads `1 / out_degree` to each of its
//!    targets, and each target's sum is damped into a single-pass inbound-link score.
//!
//! A third, optional step loads both files into a graph backend (Neo4j over Bolt, or an
//! in-memory graph).
//!
//! # Key Modules
//!
//! - [`reader`] -- Byte-range record splitting over seekable byte sources
//! - [`parser`] -- Title/body extraction, content-page filter and link recognition
//! - [`links`] -- Concurrent group-by of link mentions into adjacency records
//! - [`score`] -- Expand/reduce scoring over adjacency records
//! - [`pipeline`] -- Shard planning and the two-stage orchestration
//! - [`records`] -- Tab-separated adjacency and score line formats
//! - [`graph`] -- Graph backends that consume the record files
//! - [`models`] -- Core data types (Shard, RawRecord, Document, AdjacencyRecord)
//! - [`stats`] -- Thread-safe atomic counters for pipeline metrics
//! - [`config`] -- Constants and the JSON pipeline configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Extract links and scores with 16 shards
//! linkrank index -i enwiki-latest-pages-articles.xml -o output/ --shards 16
//!
//! # Rescore an existing adjacency file with a different damping factor
//! linkrank rank -l output/links.tsv -o output/pages.tsv --damping 0.9
//!
//! # Load the result into Neo4j
//! linkrank graph --pages output/pages.tsv --links output/links.tsv --password secret
//! ```

pub mod config;
pub mod graph;
pub mod links;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod reader;
pub mod records;
pub mod score;
pub mod stats;
