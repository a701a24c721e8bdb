//! Label files: `id<delim>label` rows mapping segment or synapse ids to
//! small category codes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::model::{Label, UNLABELED};

/// Column layout of a label file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelFileFormat {
    pub delimiter: char,
    pub id_col: usize,
    pub label_col: usize,
}

impl LabelFileFormat {
    /// Segment classifications: tab-delimited, id in column 1, label in column 2.
    pub fn segments() -> Self {
        LabelFileFormat {
            delimiter: '\t',
            id_col: 1,
            label_col: 2,
        }
    }

    /// Synapse classifications: comma-delimited `id,label`.
    pub fn synapses() -> Self {
        LabelFileFormat::default()
    }
}

impl Default for LabelFileFormat {
    fn default() -> Self {
        LabelFileFormat {
            delimiter: ',',
            id_col: 0,
            label_col: 1,
        }
    }
}

/// A bidirectional id <-> label map. `members` is always the exact inverse
/// of `labels`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelIndex {
    labels: BTreeMap<u64, Label>,
    members: BTreeMap<Label, BTreeSet<u64>>,
}

impl LabelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path, format: &LabelFileFormat) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| GraphError::io(path, e))?;
        let index = Self::parse(&text, path, format)?;
        tracing::info!("Loaded {} labels from {}", index.len(), path.display());
        Ok(index)
    }

    pub fn parse(text: &str, source: &Path, format: &LabelFileFormat) -> Result<Self> {
        let mut index = LabelIndex::new();
        let width = format.id_col.max(format.label_col) + 1;
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(format.delimiter).map(str::trim).collect();
            if fields.len() < width {
                return Err(GraphError::format(
                    source,
                    idx + 1,
                    format!("expected at least {width} fields, found {}", fields.len()),
                ));
            }
            let id = fields[format.id_col].parse::<u64>().map_err(|_| {
                GraphError::format(source, idx + 1, format!("id `{}` is not an integer", fields[format.id_col]))
            })?;
            let label = fields[format.label_col].parse::<Label>().map_err(|_| {
                GraphError::format(
                    source,
                    idx + 1,
                    format!("label `{}` is not an integer", fields[format.label_col]),
                )
            })?;
            index.set(id, label);
        }
        Ok(index)
    }

    /// Write `id<delim>label` rows in ascending id order.
    pub fn save(&self, path: &Path, delimiter: char) -> Result<()> {
        let mut out = String::new();
        for (id, label) in &self.labels {
            let _ = writeln!(out, "{id}{delimiter}{label}");
        }
        std::fs::write(path, out).map_err(|e| GraphError::io(path, e))?;
        tracing::info!("Saved {} labels to {}", self.len(), path.display());
        Ok(())
    }

    /// Give every id the source did not mention the [`UNLABELED`] label.
    pub fn include_unlabeled(&mut self, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            if !self.labels.contains_key(&id) {
                self.set(id, UNLABELED);
            }
        }
    }

    /// Assign `label` to `id`, returning the previous label.
    pub fn set(&mut self, id: u64, label: Label) -> Option<Label> {
        let previous = self.labels.insert(id, label);
        if let Some(old) = previous {
            self.detach(id, old);
        }
        self.members.entry(label).or_default().insert(id);
        previous
    }

    /// Drop `id` from both directions, returning its label.
    pub fn remove(&mut self, id: u64) -> Option<Label> {
        let label = self.labels.remove(&id)?;
        self.detach(id, label);
        Some(label)
    }

    fn detach(&mut self, id: u64, label: Label) {
        if let Some(set) = self.members.get_mut(&label) {
            set.remove(&id);
            if set.is_empty() {
                self.members.remove(&label);
            }
        }
    }

    /// Label of `id`, or [`UNLABELED`] when the id was never seen.
    pub fn label_of(&self, id: u64) -> Label {
        self.labels.get(&id).copied().unwrap_or(UNLABELED)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.labels.contains_key(&id)
    }

    pub fn members(&self, label: Label) -> Option<&BTreeSet<u64>> {
        self.members.get(&label)
    }

    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.members.keys().copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.labels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Check that `members` inverts `labels` exactly.
    pub fn is_consistent(&self) -> bool {
        let forward = self
            .labels
            .iter()
            .all(|(id, label)| self.members.get(label).is_some_and(|m| m.contains(id)));
        let backward = self.members.iter().all(|(label, ids)| {
            !ids.is_empty() && ids.iter().all(|id| self.labels.get(id) == Some(label))
        });
        forward && backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlabeled_ids_join_minus_one() {
        let mut labels =
            LabelIndex::parse("10,1\n20,2\n", Path::new("segs.csv"), &LabelFileFormat::default()).unwrap();
        labels.include_unlabeled([10, 20, 30]);

        assert_eq!(labels.label_of(30), UNLABELED);
        assert!(labels.members(UNLABELED).unwrap().contains(&30));
        assert_eq!(labels.label_of(10), 1);
        assert!(labels.is_consistent());
    }

    #[test]
    fn test_segment_layout_tab_columns() {
        let labels =
            LabelIndex::parse("0\t55\t3\n1\t56\t4\n", Path::new("segs.tsv"), &LabelFileFormat::segments())
                .unwrap();
        assert_eq!(labels.label_of(55), 3);
        assert_eq!(labels.label_of(56), 4);
    }

    #[test]
    fn test_relabel_moves_member() {
        let mut labels = LabelIndex::new();
        labels.set(5, 0);
        assert_eq!(labels.set(5, 1), Some(0));
        assert!(labels.members(0).is_none());
        assert!(labels.members(1).unwrap().contains(&5));
        assert!(labels.is_consistent());
    }

    #[test]
    fn test_bad_label_is_format_error() {
        let err = LabelIndex::parse("1,spine\n", Path::new("syn.csv"), &LabelFileFormat::default()).unwrap_err();
        assert!(matches!(err, GraphError::Format { line: 1, .. }));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        let mut labels = LabelIndex::new();
        labels.set(2, 1);
        labels.set(1, 0);
        labels.save(&path, ',').unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1,0\n2,1\n");
        let reloaded = LabelIndex::load(&path, &LabelFileFormat::default()).unwrap();
        assert_eq!(reloaded, labels);
    }
}
