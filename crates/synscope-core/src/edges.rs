//! Edge file parsing and serialization
//!
//! Each row describes one synapse:
//!
//! ```text
//! synapse_id,pre_seg_id,post_seg_id,cx,cy,cz,size[,pre_cx,pre_cy,pre_cz,post_cx,post_cy,post_cz]
//! ```
//!
//! The structured dialect writes the segment pair and the centroid as bracketed
//! tuples (`7,(10,20),(1,2,3),44`); both dialects normalize to [`Synapse`].

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::model::{Coord, SegmentId, SplitCentroids, Synapse, SynapseId};

const BASE_FIELDS: usize = 7;
const SPLIT_FIELDS: usize = 13;

static TUPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\(\[]([^\)\]]*)[\)\]]").expect("tuple pattern is valid"));
static TUPLE_SEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,;\s]+").expect("separator pattern is valid"));

/// Row layout of an edge file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDialect {
    /// Plain delimited integers.
    Plain,
    /// Segment pair and centroid as bracketed tuples.
    Structured,
    /// Decide per row: any bracket means structured.
    #[default]
    Auto,
}

/// How to read (and write back) an edge file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeFormat {
    pub dialect: EdgeDialect,
    pub delimiter: char,
    /// Subtracted from every centroid on load and added back on save.
    pub offset: Option<Coord>,
}

impl Default for EdgeFormat {
    fn default() -> Self {
        EdgeFormat {
            dialect: EdgeDialect::Auto,
            delimiter: ',',
            offset: None,
        }
    }
}

/// The flat list of synapse records read from an edge file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeTable {
    records: Vec<Synapse>,
}

impl EdgeTable {
    pub fn new(records: Vec<Synapse>) -> Self {
        EdgeTable { records }
    }

    /// Read and parse an edge file.
    pub fn load(path: &Path, format: &EdgeFormat) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| GraphError::io(path, e))?;
        let table = Self::parse(&text, path, format)?;
        tracing::info!("Loaded {} synapses from {}", table.len(), path.display());
        Ok(table)
    }

    /// Parse edge rows. `source` is only used in error messages.
    pub fn parse(text: &str, source: &Path, format: &EdgeFormat) -> Result<Self> {
        let mut records = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields = split_row(line, format)
                .map_err(|reason| GraphError::format(source, idx + 1, reason))?;
            let record = parse_record(&fields, format.offset)
                .map_err(|reason| GraphError::format(source, idx + 1, reason))?;
            records.push(record);
        }
        Ok(EdgeTable { records })
    }

    /// Write records to `path`, one row per synapse in ascending id order.
    pub fn save<'a>(
        path: &Path,
        records: impl IntoIterator<Item = &'a Synapse>,
        format: &EdgeFormat,
    ) -> Result<()> {
        let text = Self::render(records, format);
        std::fs::write(path, text).map_err(|e| GraphError::io(path, e))?;
        tracing::info!("Saved edges to {}", path.display());
        Ok(())
    }

    /// Serialize records in the plain dialect. Split centroids are written
    /// only for the records that carry them.
    pub fn render<'a>(records: impl IntoIterator<Item = &'a Synapse>, format: &EdgeFormat) -> String {
        let mut sorted: Vec<&Synapse> = records.into_iter().collect();
        sorted.sort_by_key(|s| s.id);

        let offset = format.offset.unwrap_or_default();
        let d = format.delimiter;
        let mut out = String::new();
        for s in sorted {
            let c = s.centroid.translate(offset);
            let _ = write!(
                out,
                "{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}",
                s.id, s.pre, s.post, c.x, c.y, c.z, s.size
            );
            if let Some(split) = s.split {
                let pre = split.pre.translate(offset);
                let post = split.post.translate(offset);
                let _ = write!(
                    out,
                    "{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}",
                    pre.x, pre.y, pre.z, post.x, post.y, post.z
                );
            }
            out.push('\n');
        }
        out
    }

    /// Rewrite segment ids through `map`; ids missing from the map keep
    /// their value. Returns how many endpoints changed.
    pub fn remap_segments(&mut self, map: &HashMap<SegmentId, SegmentId>) -> usize {
        let mut changed = 0;
        for record in &mut self.records {
            for seg in [&mut record.pre, &mut record.post] {
                if let Some(&new) = map.get(&*seg) {
                    if new != *seg {
                        *seg = new;
                        changed += 1;
                    }
                }
            }
        }
        changed
    }

    pub fn records(&self) -> &[Synapse] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Synapse> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Load an `old,new` segment remapping table.
pub fn load_segment_map(path: &Path) -> Result<HashMap<SegmentId, SegmentId>> {
    let text = std::fs::read_to_string(path).map_err(|e| GraphError::io(path, e))?;
    let mut map = HashMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(|c: char| c == ',' || c == '\t').map(str::trim).collect();
        if fields.len() < 2 {
            return Err(GraphError::format(path, idx + 1, "expected `old,new`"));
        }
        let old = parse_u64(fields[0], "old segment id")
            .map_err(|r| GraphError::format(path, idx + 1, r))?;
        let new = parse_u64(fields[1], "new segment id")
            .map_err(|r| GraphError::format(path, idx + 1, r))?;
        map.insert(SegmentId(old), SegmentId(new));
    }
    Ok(map)
}

fn split_row(line: &str, format: &EdgeFormat) -> std::result::Result<Vec<String>, String> {
    let structured = match format.dialect {
        EdgeDialect::Plain => false,
        EdgeDialect::Structured => true,
        EdgeDialect::Auto => line.contains(['(', '[']),
    };

    let flat = if structured {
        let delim = format.delimiter.to_string();
        TUPLE
            .replace_all(line, |caps: &regex::Captures<'_>| {
                TUPLE_SEP.split(caps[1].trim()).collect::<Vec<_>>().join(&delim)
            })
            .into_owned()
    } else {
        line.to_string()
    };

    if flat.contains(['(', ')', '[', ']']) {
        return Err("unbalanced bracket in row".to_string());
    }
    Ok(flat.split(format.delimiter).map(|f| f.trim().to_string()).collect())
}

fn parse_record(fields: &[String], offset: Option<Coord>) -> std::result::Result<Synapse, String> {
    if fields.len() != BASE_FIELDS && fields.len() != SPLIT_FIELDS {
        return Err(format!(
            "expected {BASE_FIELDS} or {SPLIT_FIELDS} fields, found {}",
            fields.len()
        ));
    }

    let offset = offset.unwrap_or_default();
    let coord_at = |i: usize| -> std::result::Result<Coord, String> {
        Ok(Coord::new(
            parse_i64(&fields[i], "coordinate")?,
            parse_i64(&fields[i + 1], "coordinate")?,
            parse_i64(&fields[i + 2], "coordinate")?,
        )
        .subtract(offset))
    };

    let split = if fields.len() == SPLIT_FIELDS {
        Some(SplitCentroids {
            pre: coord_at(7)?,
            post: coord_at(10)?,
        })
    } else {
        None
    };

    Ok(Synapse {
        id: SynapseId(parse_u64(&fields[0], "synapse id")?),
        pre: SegmentId(parse_u64(&fields[1], "pre segment id")?),
        post: SegmentId(parse_u64(&fields[2], "post segment id")?),
        centroid: coord_at(3)?,
        size: parse_u64(&fields[6], "size")?,
        split,
    })
}

fn parse_u64(field: &str, what: &str) -> std::result::Result<u64, String> {
    field
        .parse::<u64>()
        .map_err(|_| format!("{what} `{field}` is not a non-negative integer"))
}

fn parse_i64(field: &str, what: &str) -> std::result::Result<i64, String> {
    field
        .parse::<i64>()
        .map_err(|_| format!("{what} `{field}` is not an integer"))
}
