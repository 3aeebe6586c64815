//! Line formats handed to downstream loaders.
//!
//! - adjacency: `title` TAB `target,target,...` (duplicates verbatim)
//! - score: `title` TAB `score`
//!
//! Neither format is quoted; titles never contain tabs and targets never contain commas.

use crate::config::WRITE_BUFFER_SIZE;
use crate::models::{AdjacencyRecord, ScoreRecord};
use anyhow::{bail, Context, Result};
use csv::{QuoteStyle, Reader, ReaderBuilder, StringRecord, Writer, WriterBuilder};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const FIELD_SEPARATOR: u8 = b'\t';
const TARGET_SEPARATOR: char = ',';

fn tsv_writer<W: Write>(inner: W) -> Writer<W> {
    WriterBuilder::new()
        .delimiter(FIELD_SEPARATOR)
        .quote_style(QuoteStyle::Never)
        .has_headers(false)
        .from_writer(inner)
}

fn tsv_reader<R: Read>(inner: R) -> Reader<R> {
    ReaderBuilder::new()
        .delimiter(FIELD_SEPARATOR)
        .quoting(false)
        .has_headers(false)
        .flexible(true)
        .from_reader(inner)
}

pub fn adjacency_line(record: &AdjacencyRecord) -> String {
    let mut line = String::with_capacity(
        record.title.len() + 1 + record.targets.iter().map(|t| t.len() + 1).sum::<usize>(),
    );
    line.push_str(&record.title);
    line.push('\t');
    line.push_str(&join_targets(&record.targets));
    line
}

pub fn score_line(record: &ScoreRecord) -> String {
    format!("{}\t{}", record.title, record.score)
}

fn join_targets(targets: &[String]) -> String {
    targets.join(",")
}

fn split_fields(record: &StringRecord) -> Result<(&str, &str)> {
    let title = record.get(0).filter(|t| !t.is_empty()).context("Missing title field")?;
    let value = record.get(1).context("Missing value field")?;
    Ok((title, value))
}

fn adjacency_from_fields(title: &str, targets: &str) -> AdjacencyRecord {
    let targets = if targets.is_empty() {
        Vec::new()
    } else {
        targets.split(TARGET_SEPARATOR).map(str::to_string).collect()
    };
    AdjacencyRecord::new(title, targets)
}

fn score_from_fields(title: &str, score: &str) -> Result<ScoreRecord> {
    let score = score
        .trim()
        .parse::<f32>()
        .with_context(|| format!("Invalid score for {title}: {score:?}"))?;
    Ok(ScoreRecord {
        title: title.to_string(),
        score,
    })
}

/// Parses one adjacency line: split once on tab, then on commas.
pub fn parse_adjacency_line(line: &str) -> Result<AdjacencyRecord> {
    let line = line.trim_end_matches(['\n', '\r']);
    let Some((title, targets)) = line.split_once('\t') else {
        bail!("Adjacency line has no tab separator: {line:?}");
    };
    if title.is_empty() {
        bail!("Adjacency line has an empty title: {line:?}");
    }
    Ok(adjacency_from_fields(title, targets))
}

pub fn parse_score_line(line: &str) -> Result<ScoreRecord> {
    let line = line.trim_end_matches(['\n', '\r']);
    let Some((title, score)) = line.split_once('\t') else {
        bail!("Score line has no tab separator: {line:?}");
    };
    if title.is_empty() {
        bail!("Score line has an empty title: {line:?}");
    }
    score_from_fields(title, score)
}

pub fn write_adjacency<W: Write>(inner: W, records: &[AdjacencyRecord]) -> Result<()> {
    let mut writer = tsv_writer(inner);
    for record in records {
        writer.write_record([record.title.as_str(), join_targets(&record.targets).as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_scores<W: Write>(inner: W, records: &[ScoreRecord]) -> Result<()> {
    let mut writer = tsv_writer(inner);
    for record in records {
        writer.write_record([record.title.as_str(), record.score.to_string().as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_adjacency<R: Read>(inner: R) -> Result<Vec<AdjacencyRecord>> {
    let mut reader = tsv_reader(inner);
    let mut records = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Failed to read adjacency line {}", i + 1))?;
        let (title, targets) =
            split_fields(&row).with_context(|| format!("Malformed adjacency line {}", i + 1))?;
        records.push(adjacency_from_fields(title, targets));
    }
    Ok(records)
}

pub fn read_scores<R: Read>(inner: R) -> Result<Vec<ScoreRecord>> {
    let mut reader = tsv_reader(inner);
    let mut records = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Failed to read score line {}", i + 1))?;
        let (title, score) =
            split_fields(&row).with_context(|| format!("Malformed score line {}", i + 1))?;
        records.push(score_from_fields(title, score)?);
    }
    Ok(records)
}

/// Writes to a temp file beside `path` and renames it into place.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let tmp_path = path.with_extension("tsv.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", tmp_path))?;
    write(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file))
        .with_context(|| format!("Failed to write records to: {:?}", tmp_path))?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temp file to: {:?}", path))?;
    Ok(())
}

pub fn write_adjacency_file(path: &Path, records: &[AdjacencyRecord]) -> Result<()> {
    write_atomically(path, |w| write_adjacency(w, records))
}

pub fn write_scores_file(path: &Path, records: &[ScoreRecord]) -> Result<()> {
    write_atomically(path, |w| write_scores(w, records))
}

pub fn read_adjacency_file(path: &Path) -> Result<Vec<AdjacencyRecord>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open adjacency file: {:?}", path))?;
    read_adjacency(BufReader::new(file)).with_context(|| format!("In {:?}", path))
}

pub fn read_scores_file(path: &Path) -> Result<Vec<ScoreRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open score file: {:?}", path))?;
    read_scores(BufReader::new(file)).with_context(|| format!("In {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_adjacency() -> Vec<AdjacencyRecord> {
        vec![
            AdjacencyRecord::new(
                "Page 1",
                vec!["Page 2".into(), "Page 2".into(), "Page 3".into()],
            ),
            AdjacencyRecord::new("Page \"quoted\"", vec!["Target".into()]),
        ]
    }

    #[test]
    fn adjacency_line_format() {
        let line = adjacency_line(&sample_adjacency()[0]);
        assert_eq!(line, "Page 1\tPage 2,Page 2,Page 3");
    }

    #[test]
    fn score_line_format() {
        let line = score_line(&ScoreRecord {
            title: "Page 2".into(),
            score: 1.5,
        });
        assert_eq!(line, "Page 2\t1.5");
    }

    #[test]
    fn written_adjacency_matches_line_format() {
        let records = sample_adjacency();
        let mut out = Vec::new();
        write_adjacency(&mut out, &records).unwrap();

        let text = String::from_utf8(out).unwrap();
        let expected: Vec<String> = records.iter().map(adjacency_line).collect();
        assert_eq!(text.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn quotes_are_not_escaped() {
        let mut out = Vec::new();
        write_adjacency(&mut out, &sample_adjacency()[1..]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Page \"quoted\"\tTarget\n");
    }

    #[test]
    fn read_back_written_scores() {
        let scores = vec![
            ScoreRecord {
                title: "A".into(),
                score: 1.425,
            },
            ScoreRecord {
                title: "B, the letter".into(),
                score: 0.15,
            },
        ];
        let mut out = Vec::new();
        write_scores(&mut out, &scores).unwrap();
        assert_eq!(read_scores(out.as_slice()).unwrap(), scores);
    }

    #[test]
    fn parse_adjacency_line_splits_once_on_tab() {
        let record = parse_adjacency_line("Page 1\tPage 2,Page 3\n").unwrap();
        assert_eq!(record.title, "Page 1");
        assert_eq!(record.targets, vec!["Page 2", "Page 3"]);
    }

    #[test]
    fn parse_adjacency_line_without_tab_fails() {
        assert!(parse_adjacency_line("no separator here").is_err());
    }

    #[test]
    fn parse_score_line_rejects_garbage() {
        assert!(parse_score_line("Page\tnot-a-number").is_err());
        assert!(parse_score_line("\t1.0").is_err());
        assert_eq!(parse_score_line("Page\t2.5").unwrap().score, 2.5);
    }

    #[test]
    fn read_adjacency_reports_line_of_bad_row() {
        let input = "Good\tA,B\nBad row without tab\n";
        let err = read_adjacency(input.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn empty_target_field_gives_empty_record() {
        let records = read_adjacency("Lonely\t\n".as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].targets.is_empty());
    }

    #[test]
    fn files_written_atomically_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("links.tsv");

        write_adjacency_file(&path, &sample_adjacency()).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tsv.tmp").exists());

        let loaded = read_adjacency_file(&path).unwrap();
        assert_eq!(loaded, sample_adjacency());
    }

    #[test]
    fn read_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(read_scores_file(&dir.path().join("missing.tsv")).is_err());
    }
}
