//! Transactional add/remove of synapses with an undo stack

use std::path::Path;

use serde::Serialize;

use crate::edges::{EdgeFormat, EdgeTable};
use crate::error::{GraphError, Result};
use crate::index::GraphIndex;
use crate::model::{Coord, Label, SegmentId, SplitCentroids, Synapse, SynapseId, UNLABELED};

/// What undoing an applied operation has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoEntry {
    /// The synapse was created by an add; undo removes it along with the
    /// label entries of endpoints the add introduced.
    Added { id: SynapseId, new_segments: Vec<SegmentId> },
    /// The synapse was removed; undo re-inserts the exact record.
    Removed { record: Synapse, label: Label },
}

/// One operation applied to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AppliedOp {
    Add {
        id: SynapseId,
        pre: SegmentId,
        post: SegmentId,
    },
    Remove {
        id: SynapseId,
        pre: SegmentId,
        post: SegmentId,
    },
}

/// Owner of the authoritative [`GraphIndex`]. All mutation goes through
/// here so the indices and the undo stack never disagree.
#[derive(Debug, Clone, Default)]
pub struct MutationLog {
    index: GraphIndex,
    undo: Vec<UndoEntry>,
}

impl MutationLog {
    pub fn new(index: GraphIndex) -> Self {
        MutationLog {
            index,
            undo: Vec::new(),
        }
    }

    pub fn index(&self) -> &GraphIndex {
        &self.index
    }

    pub fn into_index(self) -> GraphIndex {
        self.index
    }

    /// Create a synapse from `pre` to `post` with the given endpoint
    /// centroids. The id is one past the current maximum, the centroid is
    /// the rounded midpoint and the size is 0.
    pub fn add_synapse(
        &mut self,
        pre: SegmentId,
        post: SegmentId,
        pre_coord: Coord,
        post_coord: Coord,
    ) -> Result<SynapseId> {
        let id = self.next_synapse_id()?;
        let mut new_segments: Vec<SegmentId> = [pre, post]
            .into_iter()
            .filter(|s| !self.index.segment_labels().contains(s.0))
            .collect();
        new_segments.dedup();
        let record = Synapse {
            id,
            pre,
            post,
            centroid: Coord::midpoint(pre_coord, post_coord),
            size: 0,
            split: (pre_coord != post_coord).then_some(SplitCentroids {
                pre: pre_coord,
                post: post_coord,
            }),
        };
        self.index.insert(&record, UNLABELED)?;
        self.undo.push(UndoEntry::Added { id, new_segments });
        tracing::info!("Added synapse {} ({} -> {}) at {}", id, pre, post, record.centroid);
        Ok(id)
    }

    /// Remove a synapse from every index.
    pub fn remove_synapse(&mut self, id: SynapseId) -> Result<Synapse> {
        let (record, label) = self.index.remove(id)?;
        tracing::info!("Removed synapse {} ({} -> {})", id, record.pre, record.post);
        self.undo.push(UndoEntry::Removed {
            record: record.clone(),
            label,
        });
        Ok(record)
    }

    /// Revert the most recent operation. The inverse is not itself recorded,
    /// so there is no redo.
    pub fn undo(&mut self) -> Result<AppliedOp> {
        let entry = self.undo.pop().ok_or(GraphError::EmptyUndoStack)?;
        let result = match &entry {
            UndoEntry::Added { id, new_segments } => self.index.remove(*id).map(|(record, _)| {
                for &seg in new_segments {
                    self.index.forget_segment(seg);
                }
                AppliedOp::Remove {
                    id: record.id,
                    pre: record.pre,
                    post: record.post,
                }
            }),
            UndoEntry::Removed { record, label } => {
                self.index.insert(record, *label).map(|()| AppliedOp::Add {
                    id: record.id,
                    pre: record.pre,
                    post: record.post,
                })
            }
        };
        match result {
            Ok(op) => {
                tracing::info!("Undid {:?}", entry);
                Ok(op)
            }
            Err(e) => {
                self.undo.push(entry);
                Err(e)
            }
        }
    }

    /// Entries on the undo stack, oldest first.
    pub fn history(&self) -> &[UndoEntry] {
        &self.undo
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Set the classification label of a synapse. Not undoable.
    pub fn classify_synapse(&mut self, id: SynapseId, label: Label) -> Result<Label> {
        let previous = self.index.set_synapse_label(id, label)?;
        tracing::debug!("Classified synapse {} as {} (was {})", id, label, previous);
        Ok(previous)
    }

    /// Write the current records to an edge file.
    pub fn save(&self, path: &Path, format: &EdgeFormat) -> Result<()> {
        let records = self.index.records()?;
        EdgeTable::save(path, &records, format)
    }

    /// Write the synapse classifications to a label file.
    pub fn save_synapse_labels(&self, path: &Path, delimiter: char) -> Result<()> {
        self.index.synapse_labels().save(path, delimiter)
    }

    fn next_synapse_id(&self) -> Result<SynapseId> {
        match self.index.max_synapse_id() {
            None => Ok(SynapseId(1)),
            Some(max) => max
                .0
                .checked_add(1)
                .map(SynapseId)
                .ok_or_else(|| GraphError::InvariantViolation(format!("no synapse id left after {max}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_index, synapse};

    #[test]
    fn test_add_allocates_max_plus_one() {
        let mut log = MutationLog::new(sample_index());
        let id = log
            .add_synapse(SegmentId(10), SegmentId(30), Coord::new(0, 0, 0), Coord::new(3, 4, 5))
            .unwrap();
        assert_eq!(id, SynapseId(3));

        let record = log.index().synapse(id).unwrap();
        assert_eq!(record.size, 0);
        assert_eq!(record.centroid, Coord::new(2, 2, 3));
        assert_eq!(record.pre_centroid(), Coord::new(0, 0, 0));
        assert_eq!(record.post_centroid(), Coord::new(3, 4, 5));
        log.index().check_invariants().unwrap();
    }

    #[test]
    fn test_point_marker_add_has_no_split() {
        let mut log = MutationLog::new(sample_index());
        let c = Coord::new(7, 7, 7);
        let id = log.add_synapse(SegmentId(10), SegmentId(30), c, c).unwrap();
        assert!(log.index().synapse(id).unwrap().split.is_none());
    }

    #[test]
    fn test_add_then_undo_restores_index_and_reuses_id() {
        let before = sample_index();
        let mut log = MutationLog::new(before.clone());
        let first = log
            .add_synapse(SegmentId(10), SegmentId(30), Coord::new(1, 1, 1), Coord::new(2, 2, 2))
            .unwrap();

        let op = log.undo().unwrap();
        assert!(matches!(op, AppliedOp::Remove { id, .. } if id == first));
        assert_eq!(log.index(), &before);

        let second = log
            .add_synapse(SegmentId(10), SegmentId(30), Coord::new(1, 1, 1), Coord::new(2, 2, 2))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_undo_of_add_to_new_segment_forgets_it() {
        let before = sample_index();
        let mut log = MutationLog::new(before.clone());
        log.add_synapse(SegmentId(10), SegmentId(40), Coord::new(1, 1, 1), Coord::new(2, 2, 2))
            .unwrap();
        assert!(log.index().contains_segment(SegmentId(40)));

        log.undo().unwrap();
        assert_eq!(log.index(), &before);
        assert!(!log.index().contains_segment(SegmentId(40)));
        assert!(matches!(
            log.index().synapses_of(SegmentId(40)),
            Err(GraphError::SegmentNotFound(SegmentId(40)))
        ));
        assert!(!log.index().segment_ids().contains(&SegmentId(40)));
    }

    #[test]
    fn test_undo_keeps_segment_still_in_use() {
        let mut log = MutationLog::new(sample_index());
        log.add_synapse(SegmentId(10), SegmentId(40), Coord::default(), Coord::default())
            .unwrap();
        log.add_synapse(SegmentId(20), SegmentId(40), Coord::default(), Coord::default())
            .unwrap();
        log.undo().unwrap();
        assert!(log.index().contains_segment(SegmentId(40)));
        log.undo().unwrap();
        assert!(!log.index().contains_segment(SegmentId(40)));
        log.index().check_invariants().unwrap();
    }

    #[test]
    fn test_add_past_largest_id_is_refused() {
        let mut log = MutationLog::new(GraphIndex::build(&[synapse(u64::MAX, 1, 2, [0, 0, 0])]).unwrap());
        let err = log
            .add_synapse(SegmentId(1), SegmentId(2), Coord::default(), Coord::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::InvariantViolation(_)));
        assert_eq!(log.undo_depth(), 0);
    }

    #[test]
    fn test_remove_then_undo_restores_original_record() {
        let before = sample_index();
        let original = before.synapse(SynapseId(1)).unwrap();
        let mut log = MutationLog::new(before.clone());

        log.remove_synapse(SynapseId(1)).unwrap();
        assert!(!log.index().contains_synapse(SynapseId(1)));

        log.undo().unwrap();
        assert_eq!(log.index().synapse(SynapseId(1)).unwrap(), original);
        assert_eq!(log.index(), &before);
    }

    #[test]
    fn test_undo_restores_classification_of_removed_synapse() {
        let mut log = MutationLog::new(sample_index());
        log.classify_synapse(SynapseId(2), 1).unwrap();
        log.remove_synapse(SynapseId(2)).unwrap();
        assert_eq!(log.index().synapse_label(SynapseId(2)), UNLABELED);
        log.undo().unwrap();
        assert_eq!(log.index().synapse_label(SynapseId(2)), 1);
    }

    #[test]
    fn test_remove_unknown_is_not_found_and_not_recorded() {
        let mut log = MutationLog::new(sample_index());
        let err = log.remove_synapse(SynapseId(42)).unwrap_err();
        assert!(matches!(err, GraphError::SynapseNotFound(SynapseId(42))));
        assert!(!err.is_fatal());
        assert_eq!(log.undo_depth(), 0);
    }

    #[test]
    fn test_undo_on_empty_stack() {
        let mut log = MutationLog::new(sample_index());
        let err = log.undo().unwrap_err();
        assert!(matches!(err, GraphError::EmptyUndoStack));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_undo_is_not_redoable() {
        let mut log = MutationLog::new(sample_index());
        log.remove_synapse(SynapseId(1)).unwrap();
        log.remove_synapse(SynapseId(2)).unwrap();
        log.undo().unwrap();
        assert_eq!(log.undo_depth(), 1);
        log.undo().unwrap();
        assert_eq!(log.undo_depth(), 0);
        assert!(log.undo().is_err());
    }

    #[test]
    fn test_add_on_empty_graph_starts_at_one() {
        let mut log = MutationLog::default();
        let id = log
            .add_synapse(SegmentId(1), SegmentId(2), Coord::default(), Coord::default())
            .unwrap();
        assert_eq!(id, SynapseId(1));
    }

    #[test]
    fn test_save_writes_current_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut log = MutationLog::new(sample_index());
        log.remove_synapse(SynapseId(1)).unwrap();
        log.save(&path, &EdgeFormat::default()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "2,20,30,1,1,1,5\n");
    }
}
