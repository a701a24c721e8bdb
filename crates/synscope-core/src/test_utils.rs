//! Test fixtures for synscope-core

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::index::GraphIndex;
use crate::labels::LabelIndex;
use crate::model::{Coord, SegmentId, Synapse, SynapseId};
use crate::mutation::MutationLog;

/// A synapse with size 5 and no split centroids.
pub fn synapse(id: u64, pre: u64, post: u64, centroid: [i64; 3]) -> Synapse {
    Synapse {
        id: SynapseId(id),
        pre: SegmentId(pre),
        post: SegmentId(post),
        centroid: Coord::from(centroid),
        size: 5,
        split: None,
    }
}

/// The two-synapse chain `10 -> 20 -> 30`.
pub fn sample_records() -> Vec<Synapse> {
    vec![synapse(1, 10, 20, [0, 0, 0]), synapse(2, 20, 30, [1, 1, 1])]
}

pub fn sample_index() -> GraphIndex {
    GraphIndex::build(&sample_records()).unwrap()
}

/// A labeled graph around segment 1 used by the query tests.
///
/// Segment labels: 2 -> 1, 3 -> 2, 4 -> 1, 5 unlabeled.
/// Synapse labels: 100, 102 -> 0 (shaft), 101, 103 -> 1 (spine).
pub fn labeled_log() -> MutationLog {
    let records = vec![
        synapse(100, 2, 1, [10, 0, 0]),
        synapse(101, 3, 1, [11, 0, 0]),
        synapse(102, 1, 4, [12, 0, 0]),
        synapse(103, 5, 1, [13, 0, 0]),
        synapse(104, 2, 6, [14, 0, 0]),
        synapse(105, 6, 3, [15, 0, 0]),
    ];
    let mut index = GraphIndex::build(&records).unwrap();

    let mut segs = LabelIndex::new();
    segs.set(2, 1);
    segs.set(3, 2);
    segs.set(4, 1);
    let mut syns = LabelIndex::new();
    syns.set(100, 0);
    syns.set(101, 1);
    syns.set(102, 0);
    syns.set(103, 1);
    index.attach_labels(segs, syns);
    MutationLog::new(index)
}

/// Write `content` to `name` inside a fresh temporary directory.
pub fn write_temp(name: &str, content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    (dir, path)
}
