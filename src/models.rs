use serde::Serialize;
use std::fmt;

/// A contiguous byte range `[start, end)` of the input owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Shard {
    pub id: u32,
    pub start: u64,
    pub end: u64,
}

impl Shard {
    pub fn new(id: u32, start: u64, end: u64) -> Self {
        Self { id, start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits `total_len` bytes into `count` near-equal shards covering the whole stream.
    pub fn partition(total_len: u64, count: usize) -> Vec<Shard> {
        let count = count.max(1) as u64;
        let base = total_len / count;
        let remainder = total_len % count;

        let mut shards = Vec::with_capacity(count as usize);
        let mut start = 0;
        for id in 0..count {
            let len = base + u64::from(id < remainder);
            shards.push(Shard::new(id as u32, start, start + len));
            start += len;
        }
        shards
    }

    /// Splits `total_len` bytes into consecutive shards of at most `split_size` bytes.
    pub fn partition_by_size(total_len: u64, split_size: u64) -> Vec<Shard> {
        let split_size = split_size.max(1);
        let mut shards = Vec::new();
        let mut start = 0;
        let mut id = 0u32;
        while start < total_len {
            let end = (start + split_size).min(total_len);
            shards.push(Shard::new(id, start, end));
            start = end;
            id += 1;
        }
        if shards.is_empty() {
            shards.push(Shard::new(0, 0, 0));
        }
        shards
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {} [{}..{})", self.id, self.start, self.end)
    }
}

/// Bytes of one whole record plus the stream offset just past its end tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub bytes: Vec<u8>,
    pub end_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkMention {
    pub source: String,
    pub target: String,
}

impl LinkMention {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Outgoing targets of one source page; `targets.len()` is the out-degree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdjacencyRecord {
    pub title: String,
    pub targets: Vec<String>,
}

impl AdjacencyRecord {
    pub fn new(title: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            title: title.into(),
            targets,
        }
    }

    pub fn out_degree(&self) -> usize {
        self.targets.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub title: String,
    pub score: f32,
}
