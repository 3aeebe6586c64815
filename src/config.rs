use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Literal tag opening a record in the dump
pub const PAGE_START_TAG: &str = "<page>";

/// Literal tag closing a record in the dump
pub const PAGE_END_TAG: &str = "</page>";

pub const TITLE_START_MARKER: &str = "<title>";
pub const TITLE_END_MARKER: &str = "</title>";

/// Body opening tag; carries attributes, so the body starts after the next `>`
pub const BODY_START_MARKER: &str = "<text";
pub const BODY_END_MARKER: &str = "</text>";

/// Titles containing this character are non-content pages (Category:, File:, ...)
pub const NAMESPACE_SEPARATOR: char = ':';

/// Maximum length of a raw link candidate, brackets included
pub const MAX_LINK_LENGTH: usize = 100;

/// First content characters that disqualify a link candidate
pub const REJECTED_LEADING_CHARS: &str = "#,.&'-{";

/// Characters that disqualify a link candidate anywhere inside it
pub const REJECTED_LINK_CHARS: &str = ":,&";

/// Weight of the inbound-link signal against the fixed baseline
pub const DAMPING_FACTOR: f32 = 0.85;

/// Number of shards the input is partitioned into when no split size is given
pub const DEFAULT_SHARD_COUNT: usize = 8;

/// Read buffer per shard reader
pub const READ_BUFFER_SIZE: usize = 128 * 1024;

/// Buffer for the TSV record writers
pub const WRITE_BUFFER_SIZE: usize = 256 * 1024;

pub const LINKS_FILE_NAME: &str = "links.tsv";
pub const PAGES_FILE_NAME: &str = "pages.tsv";

pub const DEFAULT_BOLT_URI: &str = "bolt://localhost:7687";
pub const DEFAULT_NEO4J_USER: &str = "neo4j";

/// Rows per UNWIND batch when loading into Neo4j
pub const GRAPH_BATCH_SIZE: usize = 10_000;

/// Max concurrent batch queries against the graph backend
pub const GRAPH_MAX_PARALLEL: usize = 4;

pub const GRAPH_MAX_RETRIES: u32 = 10;
pub const GRAPH_RETRY_DELAY_SECS: u64 = 3;

/// Log a shard progress line every N records
pub const PROGRESS_INTERVAL: u64 = 25_000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub start_tag: String,
    pub end_tag: String,
    pub buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            start_tag: PAGE_START_TAG.to_string(),
            end_tag: PAGE_END_TAG.to_string(),
            buffer_size: READ_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub title_start: String,
    pub title_end: String,
    pub body_start: String,
    pub body_end: String,
    pub namespace_separator: char,
    pub max_link_length: usize,
    pub rejected_leading_chars: String,
    pub rejected_link_chars: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            title_start: TITLE_START_MARKER.to_string(),
            title_end: TITLE_END_MARKER.to_string(),
            body_start: BODY_START_MARKER.to_string(),
            body_end: BODY_END_MARKER.to_string(),
            namespace_separator: NAMESPACE_SEPARATOR,
            max_link_length: MAX_LINK_LENGTH,
            rejected_leading_chars: REJECTED_LEADING_CHARS.to_string(),
            rejected_link_chars: REJECTED_LINK_CHARS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    pub damping: f32,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            damping: DAMPING_FACTOR,
        }
    }
}

/// Everything the pipeline needs, passed explicitly into each stage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reader: ReaderConfig,
    pub parser: ParserConfig,
    pub scoring: ScoreConfig,
    pub shards: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            parser: ParserConfig::default(),
            scoring: ScoreConfig::default(),
            shards: DEFAULT_SHARD_COUNT,
        }
    }
}

impl PipelineConfig {
    /// Loads a JSON config file; missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file: {:?}", path))?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reader.start_tag.is_empty() || self.reader.end_tag.is_empty() {
            bail!("Record start and end tags must not be empty");
        }
        if self.reader.buffer_size == 0 {
            bail!("Reader buffer size must be positive");
        }
        if self.parser.title_start.is_empty()
            || self.parser.title_end.is_empty()
            || self.parser.body_start.is_empty()
            || self.parser.body_end.is_empty()
        {
            bail!("Title and body markers must not be empty");
        }
        if self.parser.max_link_length == 0 {
            bail!("Maximum link length must be positive");
        }
        if !(0.0..=1.0).contains(&self.scoring.damping) {
            bail!(
                "Damping factor must lie in [0, 1], got {}",
                self.scoring.damping
            );
        }
        if self.shards == 0 {
            bail!("Shard count must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn load_partial_json_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"scoring": {{"damping": 0.5}}, "shards": 3}}"#).unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.scoring.damping, 0.5);
        assert_eq!(config.shards, 3);
        assert_eq!(config.reader.start_tag, PAGE_START_TAG);
        assert_eq!(config.parser.max_link_length, MAX_LINK_LENGTH);
    }

    #[test]
    fn load_rejects_bad_damping() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"scoring": {{"damping": 1.5}}}}"#).unwrap();

        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Damping factor"));
    }

    #[test]
    fn load_rejects_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(PipelineConfig::load(file.path()).is_err());
    }

    #[test]
    fn validate_rejects_empty_tags() {
        let mut config = PipelineConfig::default();
        config.reader.end_tag.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_shards() {
        let config = PipelineConfig {
            shards: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
