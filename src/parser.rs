use crate::config::ParserConfig;
use crate::models::{Document, LinkMention, RawRecord};
use memchr::{memchr, memmem};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

/// Shortest `[` ... `]` span on one line; `[[x]]` matches as `[[x]`.
static LINK_CANDIDATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[.+?\]").unwrap());

/// Outcome of scanning one body for links.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkScan {
    pub targets: Vec<String>,
    pub rejected: u64,
}

pub struct DocumentParser {
    config: ParserConfig,
}

impl DocumentParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Splits a raw record into title and body. Returns `None` when the title markers are
    /// missing; a missing body yields an empty body.
    pub fn parse(&self, record: &RawRecord) -> Option<Document> {
        let bytes = record.bytes.as_slice();

        let title_start =
            memmem::find(bytes, self.config.title_start.as_bytes())? + self.config.title_start.len();
        let title_len = memmem::find(&bytes[title_start..], self.config.title_end.as_bytes())?;
        let title = String::from_utf8_lossy(&bytes[title_start..title_start + title_len]);

        let body = self
            .find_body(bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();

        Some(Document {
            title: title.into_owned(),
            body,
        })
    }

    fn find_body<'a>(&self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        let marker = memmem::find(bytes, self.config.body_start.as_bytes())?;
        // The opening tag carries attributes: <text xml:space="preserve" bytes="17745">
        let open_end = marker + memchr(b'>', &bytes[marker..])? + 1;
        let len = memmem::find(&bytes[open_end..], self.config.body_end.as_bytes())?;
        Some(&bytes[open_end..open_end + len])
    }

    /// Content pages only: non-empty titles outside any namespace, usable as a record key.
    pub fn is_content_page(&self, doc: &Document) -> bool {
        !doc.title.is_empty()
            && !doc.title.contains(self.config.namespace_separator)
            && !doc.title.contains(['\t', '\r', '\n'])
    }

    /// Accepted link targets in body order, duplicates kept.
    pub fn extract_links(&self, doc: &Document) -> Vec<String> {
        self.scan_links(&doc.body).targets
    }

    pub fn scan_links(&self, body: &str) -> LinkScan {
        let mut scan = LinkScan::default();
        for candidate in LINK_CANDIDATE_REGEX.find_iter(body) {
            match self.parse_link(candidate.as_str()) {
                Some(target) => scan.targets.push(target.to_string()),
                None => {
                    trace!(candidate = candidate.as_str(), "Rejected link candidate");
                    scan.rejected += 1;
                }
            }
        }
        scan
    }

    /// Applies the link heuristics to one bracketed candidate and returns its target title.
    ///
    /// The disqualifying characters are checked against the whole candidate, display text
    /// and anchor included, so `[[Paris|Paris, France]]` is rejected.
    pub fn parse_link<'a>(&self, candidate: &'a str) -> Option<&'a str> {
        let open = if candidate.starts_with("[[") {
            2
        } else if candidate.starts_with('[') {
            1
        } else {
            return None;
        };

        let len = candidate.chars().count();
        if len < open + 2 || len > self.config.max_link_length {
            return None;
        }

        let content = &candidate[open..];
        let first = content.chars().next()?;
        if self.config.rejected_leading_chars.contains(first) {
            return None;
        }
        if candidate.contains(|c: char| self.config.rejected_link_chars.contains(c)) {
            return None;
        }

        let end = content.find([']', '|', '#']).unwrap_or(content.len());
        let target = &content[..end];
        if target.is_empty() || target.contains(['\t', '\r']) {
            return None;
        }
        Some(target)
    }

    /// Every `(source, target)` mention a record contributes; empty for non-content pages.
    pub fn link_mentions(&self, record: &RawRecord) -> Vec<LinkMention> {
        let doc = match self.parse(record) {
            Some(doc) if self.is_content_page(&doc) => doc,
            _ => return Vec::new(),
        };
        self.extract_links(&doc)
            .into_iter()
            .map(|target| LinkMention::new(doc.title.clone(), target))
            .collect()
    }
}

impl Default for DocumentParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}
